//! This module contains types used throughout the IMAP protocol.

/// From section [2.3.1.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.1).
///
/// A 32-bit value assigned to each message, which when used with the unique identifier validity
/// value forms a 64-bit value that will not refer to any other message in the mailbox or any
/// subsequent mailbox with the same name forever.  Unique identifiers are assigned in a strictly
/// ascending fashion in the mailbox; as each message is added to the mailbox it is assigned a
/// higher UID than the message(s) which were added previously.  Unlike message sequence numbers,
/// unique identifiers are not necessarily contiguous.
///
/// The unique identifier of a message will not change during the session, and will generally not
/// change between sessions.  Any change of unique identifiers between sessions will be detectable
/// using the `UIDVALIDITY` mechanism, which is why every cached record in this crate is keyed
/// by both values.
pub type Uid = u32;

/// From section [2.3.1.2 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.2).
///
/// A relative position from 1 to the number of messages in the mailbox.
/// This position is ordered by ascending unique identifier.  As
/// each new message is added, it is assigned a message sequence number
/// that is 1 higher than the number of messages in the mailbox before
/// that new message was added.
///
/// Message sequence numbers can be reassigned during the session.  For
/// example, when a message is permanently removed (expunged) from the
/// mailbox, the message sequence number for all subsequent messages is
/// decremented.  The number of messages in the mailbox is also
/// decremented.
pub type Seq = u32;

/// From [RFC 7162 section 3.1](https://tools.ietf.org/html/rfc7162#section-3.1).
///
/// A mod-sequence is a positive unsigned 63-bit value that the server bumps every time the
/// metadata of a message changes. Zero means the mailbox does not keep mod-sequences.
pub type ModSeq = u64;

mod flag;
pub use self::flag::{Flag, Flags};

mod mailbox;
pub use self::mailbox::{MailboxStatus, StatusCache};

mod name;
pub use self::name::{Name, NameAttribute};

mod capabilities;
pub use self::capabilities::{Capabilities, Capability};

mod acls;
pub use self::acls::Rights;

mod envelope;
pub use self::envelope::{Address, Envelope};
