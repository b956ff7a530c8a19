/// A name that matches a `LIST` or `LSUB` command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Name {
    pub(crate) attributes: Vec<NameAttribute>,
    pub(crate) delimiter: Option<char>,
    pub(crate) name: String,
}

/// An attribute set for an IMAP name.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[non_exhaustive]
pub enum NameAttribute {
    /// It is not possible for any child levels of hierarchy to exist
    /// under this name; no child levels exist now and none can be
    /// created in the future.
    NoInferiors,

    /// It is not possible to use this name as a selectable mailbox.
    NoSelect,

    /// The mailbox has been marked "interesting" by the server; the
    /// mailbox probably contains messages that have been added since
    /// the last time the mailbox was selected.
    Marked,

    /// The mailbox does not contain any additional messages since the
    /// last time the mailbox was selected.
    Unmarked,

    /// [RFC 5258](https://tools.ietf.org/html/rfc5258#section-3): the name does not refer to
    /// an existing mailbox. Implies `NoSelect`.
    NonExistent,

    /// [RFC 5258](https://tools.ietf.org/html/rfc5258#section-3): the mailbox has no child
    /// mailboxes that are accessible to the user.
    HasNoChildren,

    /// [RFC 5258](https://tools.ietf.org/html/rfc5258#section-3): the mailbox has child
    /// mailboxes.
    HasChildren,

    /// A non-standard user- or server-defined name attribute.
    Custom(String),
}

impl NameAttribute {
    fn system(s: &str) -> Option<Self> {
        const SYSTEM: [(&str, NameAttribute); 7] = [
            ("\\Noinferiors", NameAttribute::NoInferiors),
            ("\\Noselect", NameAttribute::NoSelect),
            ("\\Marked", NameAttribute::Marked),
            ("\\Unmarked", NameAttribute::Unmarked),
            ("\\NonExistent", NameAttribute::NonExistent),
            ("\\HasNoChildren", NameAttribute::HasNoChildren),
            ("\\HasChildren", NameAttribute::HasChildren),
        ];
        SYSTEM
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, attr)| attr.clone())
    }
}

impl From<&str> for NameAttribute {
    fn from(s: &str) -> Self {
        NameAttribute::system(s).unwrap_or_else(|| NameAttribute::Custom(s.to_string()))
    }
}

impl Name {
    pub(crate) fn new(attributes: Vec<NameAttribute>, delimiter: Option<char>, name: String) -> Self {
        Name {
            attributes,
            delimiter,
            name,
        }
    }

    /// Attributes of this name.
    pub fn attributes(&self) -> &[NameAttribute] {
        &self.attributes[..]
    }

    /// The hierarchy delimiter is a character used to delimit levels of hierarchy in a mailbox
    /// name.  A client can use it to create child mailboxes, and to search higher or lower levels
    /// of naming hierarchy.  All children of a top-level hierarchy node use the same
    /// separator character.  `None` means that no hierarchy exists; the name is a "flat" name.
    pub fn delimiter(&self) -> Option<char> {
        self.delimiter
    }

    /// The name represents an unambiguous left-to-right hierarchy, and are valid for use as a
    /// reference in `LIST` and `LSUB` commands. Unless [`NameAttribute::NoSelect`] is indicated,
    /// the name is also valid as an argument for commands, such as `SELECT`, that accept mailbox
    /// names.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the name cannot be selected, in either its RFC 3501 or RFC 5258 spelling.
    pub fn is_noselect(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, NameAttribute::NoSelect | NameAttribute::NonExistent))
    }

    /// Whether the name cannot have children, in either its RFC 3501 or RFC 5258 spelling.
    pub fn is_noinferiors(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, NameAttribute::NoInferiors | NameAttribute::HasNoChildren))
    }
}
