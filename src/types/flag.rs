use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// With the exception of [`Flag::Custom`], these flags are system flags that are pre-defined in
/// [RFC 3501 section 2.3.2](https://tools.ietf.org/html/rfc3501#section-2.3.2). All system flags
/// begin with `\` in the IMAP protocol.  Certain system flags (`\Deleted` and `\Seen`) have
/// special semantics described elsewhere.
///
/// > Note: The `\Recent` system flag is a special case of a session flag.  `\Recent` can not be
/// > used as an argument in a `STORE` or `APPEND` command, and thus can not be changed at all.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[non_exhaustive]
pub enum Flag<'a> {
    /// Message has been read
    Seen,

    /// Message has been answered
    Answered,

    /// Message is "flagged" for urgent/special attention
    Flagged,

    /// Message is "deleted" for removal by later EXPUNGE
    Deleted,

    /// Message has not completed composition (marked as a draft).
    Draft,

    /// Message is "recently" arrived in this mailbox.
    Recent,

    /// `PERMANENTFLAGS` can include this special flag (`\*`), which indicates that it is
    /// possible to create new keywords by attempting to store those flags in the mailbox.
    MayCreate,

    /// A non-standard user- or server-defined flag.
    Custom(Cow<'a, str>),
}

impl Flag<'static> {
    fn system(s: &str) -> Option<Self> {
        const SYSTEM: [(&str, Flag<'static>); 7] = [
            ("\\Seen", Flag::Seen),
            ("\\Answered", Flag::Answered),
            ("\\Flagged", Flag::Flagged),
            ("\\Deleted", Flag::Deleted),
            ("\\Draft", Flag::Draft),
            ("\\Recent", Flag::Recent),
            ("\\*", Flag::MayCreate),
        ];
        // flag names are case-insensitive on the wire
        SYSTEM
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, flag)| flag.clone())
    }
}

impl<'a> std::fmt::Display for Flag<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Flag::Seen => write!(f, "\\Seen"),
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Recent => write!(f, "\\Recent"),
            Flag::MayCreate => write!(f, "\\*"),
            Flag::Custom(ref s) => write!(f, "{}", s),
        }
    }
}

impl<'a> From<&'a str> for Flag<'a> {
    fn from(s: &'a str) -> Self {
        if let Some(f) = Flag::system(s) {
            f
        } else {
            Flag::Custom(Cow::Borrowed(s))
        }
    }
}

/// The flag state of one message, either as displayed locally or as last reported by the
/// server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub seen: bool,
    pub old: bool,
    pub deleted: bool,
    pub flagged: bool,
    pub answered: bool,
    /// User keywords, in server order.
    pub keywords: Vec<String>,
    /// System flags this crate has no field for, such as `\Draft`.
    pub system: Vec<String>,
}

impl Flags {
    /// Build the flag state from the tokens of a `FLAGS (...)` list.
    ///
    /// `Old` is an ordinary keyword unless `mark_old` is set.
    pub fn from_tokens<'a, I>(tokens: I, mark_old: bool) -> Flags
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut flags = Flags::default();
        for token in tokens {
            match Flag::from(token) {
                Flag::Seen => flags.seen = true,
                Flag::Answered => flags.answered = true,
                Flag::Flagged => flags.flagged = true,
                Flag::Deleted => flags.deleted = true,
                Flag::Recent | Flag::MayCreate => {}
                Flag::Draft => flags.system.push(token.to_string()),
                Flag::Custom(s) if mark_old && s.eq_ignore_ascii_case("old") => flags.old = true,
                Flag::Custom(s) if s.starts_with('\\') => flags.system.push(s.into_owned()),
                Flag::Custom(s) => flags.keywords.push(s.into_owned()),
            }
        }
        flags
    }

    /// Fold a fresh server flag set into the displayed state.
    ///
    /// `self` is what the user sees, `known` the previous server state. Local edits win while
    /// `local_changes` is set. Returns whether the server changed anything the user sees.
    pub(crate) fn reconcile(&mut self, known: &Flags, server: &Flags, local_changes: bool) -> bool {
        let mut server_changes = false;
        let fields = [
            (&mut self.old, known.old, server.old),
            (&mut self.seen, known.seen, server.seen),
            (&mut self.deleted, known.deleted, server.deleted),
            (&mut self.flagged, known.flagged, server.flagged),
            (&mut self.answered, known.answered, server.answered),
        ];
        for (displayed, old_value, new_value) in fields {
            if old_value == new_value && local_changes {
                continue;
            }
            if new_value == *displayed {
                continue;
            }
            server_changes = true;
            if !local_changes {
                *displayed = new_value;
            }
        }

        self.keywords = server.keywords.clone();
        self.system = server.system.clone();
        server_changes
    }

    /// The list used to replace a message's flags on the server with `STORE FLAGS`.
    pub(crate) fn store_list(&self, mark_old: bool) -> String {
        let mut out: Vec<Cow<'_, str>> = Vec::new();
        if self.seen {
            out.push(Cow::Borrowed("\\Seen"));
        } else if self.old && mark_old {
            out.push(Cow::Borrowed("Old"));
        }
        if self.flagged {
            out.push(Cow::Borrowed("\\Flagged"));
        }
        if self.answered {
            out.push(Cow::Borrowed("\\Answered"));
        }
        if self.deleted {
            out.push(Cow::Borrowed("\\Deleted"));
        }
        out.extend(self.system.iter().map(|s| Cow::Borrowed(s.as_str())));
        out.extend(self.keywords.iter().map(|s| Cow::Borrowed(s.as_str())));
        crate::utils::iter_join(out, " ")
    }

    /// The subset of flags that APPEND carries along with an uploaded message.
    pub(crate) fn append_list(&self) -> String {
        let mut out = Vec::new();
        if self.seen {
            out.push(Flag::Seen);
        }
        if self.answered {
            out.push(Flag::Answered);
        }
        if self.flagged {
            out.push(Flag::Flagged);
        }
        crate::utils::iter_join(out, " ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens() {
        let flags = Flags::from_tokens(["\\SEEN", "\\Draft", "Old", "$Junk", "\\Recent"], true);
        assert!(flags.seen);
        assert!(flags.old);
        assert!(!flags.deleted);
        assert_eq!(flags.keywords, vec!["$Junk".to_string()]);
        assert_eq!(flags.system, vec!["\\Draft".to_string()]);

        let flags = Flags::from_tokens(["Old"], false);
        assert!(!flags.old);
        assert_eq!(flags.keywords, vec!["Old".to_string()]);
    }

    #[test]
    fn server_update_applies_without_local_edits() {
        let known = Flags::default();
        let server = Flags {
            seen: true,
            keywords: vec!["work".into()],
            ..Flags::default()
        };
        let mut displayed = Flags::default();
        assert!(displayed.reconcile(&known, &server, false));
        assert!(displayed.seen);
        assert_eq!(displayed.keywords, vec!["work".to_string()]);
    }

    #[test]
    fn local_edits_win() {
        let known = Flags::default();
        let server = Flags {
            flagged: true,
            ..Flags::default()
        };
        // the user unflagged nothing but marked the message deleted locally
        let mut displayed = Flags {
            deleted: true,
            ..Flags::default()
        };
        assert!(displayed.reconcile(&known, &server, true));
        assert!(!displayed.flagged);
        assert!(displayed.deleted);
    }

    #[test]
    fn unchanged_server_value_is_ignored_with_local_edits() {
        let known = Flags {
            seen: true,
            ..Flags::default()
        };
        let server = known.clone();
        let mut displayed = Flags::default();
        assert!(!displayed.reconcile(&known, &server, true));
        assert!(!displayed.seen);
    }

    #[test]
    fn keywords_replaced_wholesale() {
        let mut displayed = Flags {
            keywords: vec!["a".into(), "b".into()],
            ..Flags::default()
        };
        let server = Flags {
            keywords: vec!["c".into()],
            ..Flags::default()
        };
        displayed.reconcile(&Flags::default(), &server, true);
        assert_eq!(displayed.keywords, vec!["c".to_string()]);
    }

    #[test]
    fn store_list() {
        let flags = Flags {
            old: true,
            flagged: true,
            keywords: vec!["$Label1".into()],
            ..Flags::default()
        };
        assert_eq!(flags.store_list(true), "Old \\Flagged $Label1");
        assert_eq!(flags.store_list(false), "\\Flagged $Label1");
        assert_eq!(flags.append_list(), "\\Flagged");
    }
}
