use bitflags::bitflags;
use std::fmt::{Display, Formatter};

bitflags! {
    /// Access rights of the logged-in user on a mailbox, from
    /// [RFC 4314](https://tools.ietf.org/html/rfc4314#section-2.1).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Rights: u16 {
        /// `l`: the mailbox is visible to LIST/LSUB.
        const LOOKUP = 1;
        /// `r`: SELECT, FETCH, SEARCH, COPY from the mailbox.
        const READ = 1 << 1;
        /// `s`: keep seen/unseen information across sessions.
        const SEEN = 1 << 2;
        /// `w`: set or clear flags other than `\Seen` and `\Deleted`.
        const WRITE = 1 << 3;
        /// `i`: APPEND and COPY into the mailbox.
        const INSERT = 1 << 4;
        /// `p`: send mail to the submission address of the mailbox.
        const POST = 1 << 5;
        /// `k`: create child mailboxes.
        const CREATE = 1 << 6;
        /// `x`: delete the mailbox itself.
        const DELETE_MAILBOX = 1 << 7;
        /// `t`: set or clear `\Deleted`.
        const DELETE = 1 << 8;
        /// `e`: EXPUNGE.
        const EXPUNGE = 1 << 9;
        /// `a`: administer the ACL.
        const ADMIN = 1 << 10;
    }
}

impl Default for Rights {
    fn default() -> Self {
        Rights::empty()
    }
}

impl Rights {
    /// Parse the rights letters of a MYRIGHTS response.
    ///
    /// Letters from RFC 2086 are mapped to the rights they were split into. Parsing stops at
    /// the first character that is not a right.
    pub fn parse(s: &str) -> Rights {
        let mut rights = Rights::empty();
        for c in s.chars() {
            rights |= match c {
                'a' => Rights::ADMIN,
                'e' => Rights::EXPUNGE,
                'i' => Rights::INSERT,
                'k' => Rights::CREATE,
                'l' => Rights::LOOKUP,
                'p' => Rights::POST,
                'r' => Rights::READ,
                's' => Rights::SEEN,
                't' => Rights::DELETE,
                'w' => Rights::WRITE,
                'x' => Rights::DELETE_MAILBOX,
                'c' => Rights::CREATE | Rights::DELETE_MAILBOX,
                'd' => Rights::DELETE | Rights::EXPUNGE,
                _ => {
                    log::debug!("Unknown right: {}", c);
                    break;
                }
            };
        }
        rights
    }
}

impl Display for Rights {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        const LETTERS: [(Rights, char); 11] = [
            (Rights::ADMIN, 'a'),
            (Rights::EXPUNGE, 'e'),
            (Rights::INSERT, 'i'),
            (Rights::CREATE, 'k'),
            (Rights::LOOKUP, 'l'),
            (Rights::POST, 'p'),
            (Rights::READ, 'r'),
            (Rights::SEEN, 's'),
            (Rights::DELETE, 't'),
            (Rights::WRITE, 'w'),
            (Rights::DELETE_MAILBOX, 'x'),
        ];
        let s: String = LETTERS
            .iter()
            .filter(|(r, _)| self.contains(*r))
            .map(|(_, c)| *c)
            .collect();
        f.write_str(&s)
    }
}
