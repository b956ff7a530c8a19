use bitflags::bitflags;

bitflags! {
    /// Capabilities this crate knows how to use or needs to be aware of.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Capability: u32 {
        const IMAP4 = 1;
        const IMAP4REV1 = 1 << 1;
        const STATUS = 1 << 2;
        const ACL = 1 << 3;
        const NAMESPACE = 1 << 4;
        const AUTH_CRAM_MD5 = 1 << 5;
        const AUTH_GSSAPI = 1 << 6;
        const AUTH_ANONYMOUS = 1 << 7;
        const AUTH_OAUTHBEARER = 1 << 8;
        const STARTTLS = 1 << 9;
        const LOGINDISABLED = 1 << 10;
        const IDLE = 1 << 11;
        const SASL_IR = 1 << 12;
        const ENABLE = 1 << 13;
        const CONDSTORE = 1 << 14;
        const QRESYNC = 1 << 15;
        const LIST_EXTENDED = 1 << 16;
        const COMPRESS_DEFLATE = 1 << 17;
        const X_GM_EXT_1 = 1 << 18;
        const UTF8_ACCEPT = 1 << 19;
    }
}

impl Default for Capability {
    fn default() -> Self {
        Capability::empty()
    }
}

const CAPABILITY_NAMES: &[(&str, Capability)] = &[
    ("IMAP4", Capability::IMAP4),
    ("IMAP4rev1", Capability::IMAP4REV1),
    ("STATUS", Capability::STATUS),
    ("ACL", Capability::ACL),
    ("NAMESPACE", Capability::NAMESPACE),
    ("AUTH=CRAM-MD5", Capability::AUTH_CRAM_MD5),
    ("AUTH=GSSAPI", Capability::AUTH_GSSAPI),
    ("AUTH=ANONYMOUS", Capability::AUTH_ANONYMOUS),
    ("AUTH=OAUTHBEARER", Capability::AUTH_OAUTHBEARER),
    ("STARTTLS", Capability::STARTTLS),
    ("LOGINDISABLED", Capability::LOGINDISABLED),
    ("IDLE", Capability::IDLE),
    ("SASL-IR", Capability::SASL_IR),
    ("ENABLE", Capability::ENABLE),
    ("CONDSTORE", Capability::CONDSTORE),
    ("QRESYNC", Capability::QRESYNC),
    ("LIST-EXTENDED", Capability::LIST_EXTENDED),
    ("COMPRESS=DEFLATE", Capability::COMPRESS_DEFLATE),
    ("X-GM-EXT-1", Capability::X_GM_EXT_1),
    ("UTF8=ACCEPT", Capability::UTF8_ACCEPT),
];

/// From [section 7.2.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-7.2.1).
///
/// A list of capabilities that the server supports.
///
/// A capability name which begins with `AUTH=` indicates that the server supports that particular
/// authentication mechanism. The `LOGINDISABLED` capability indicates that the `LOGIN` command is
/// disabled. Client implementations MUST ignore any unknown capability names, so unknown words are
/// only kept in their raw form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    known: Capability,
    raw: Vec<String>,
}

impl Capabilities {
    /// Replace the capability set with the words of a CAPABILITY response.
    pub(crate) fn parse<'a, I>(words: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut caps = Capabilities::default();
        for word in words {
            if let Some((_, cap)) = CAPABILITY_NAMES
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(word))
            {
                caps.known |= *cap;
            }
            caps.raw.push(word.to_string());
        }
        caps
    }

    /// Check if the server has the given capability, by name.
    pub fn has(&self, s: &str) -> bool {
        self.raw.iter().any(|c| c.eq_ignore_ascii_case(s))
    }

    /// Check whether all the given known capabilities are present.
    pub fn contains(&self, cap: Capability) -> bool {
        self.known.contains(cap)
    }

    /// Stop using a capability the server advertised but could not deliver.
    pub(crate) fn remove(&mut self, cap: Capability) {
        self.known.remove(cap);
    }

    /// The SASL mechanisms advertised with `AUTH=`.
    pub fn auth_mechanisms(&self) -> impl Iterator<Item = &str> {
        self.raw.iter().filter_map(|c| {
            match c.get(..5) {
                Some(prefix) if prefix.eq_ignore_ascii_case("AUTH=") => c.get(5..),
                _ => None,
            }
        })
    }

    /// Iterate over all the server's capabilities
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.raw.iter().map(String::as_str)
    }

    /// Returns how many capabilities the server has.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns true if the server purports to have no capabilities.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}
