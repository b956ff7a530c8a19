//! Message handles of the selected mailbox and the two views onto them.
//!
//! Handles live in a generational arena owned by [`Mailbox`]. The MSN index and the UID hash
//! only hold [`MessageKey`]s, so a handle that has been dropped can never be reached through
//! either of them: a stale key simply fails to resolve.

use std::collections::HashMap;

use bitflags::bitflags;
use chrono::{DateTime, FixedOffset};

use crate::seqset::SeqsetBuilder;
use crate::types::{Envelope, Flags, ModSeq, Rights, Seq, Uid};

/// MSN of a handle that has been expunged but not yet compacted away.
pub(crate) const EXPUNGED_MSN: Seq = Seq::MAX;

/// Stable reference to a message handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageKey {
    slot: u32,
    generation: u32,
}

#[cfg(test)]
impl MessageKey {
    pub(crate) fn dummy(slot: u32) -> Self {
        MessageKey {
            slot,
            generation: 0,
        }
    }
}

/// One message of the selected mailbox.
#[derive(Clone, Debug)]
pub struct Message {
    pub(crate) uid: Uid,
    pub(crate) msn: Seq,
    /// Sort position; expunged handles get `usize::MAX` so they sort last.
    pub(crate) index: usize,
    pub(crate) flags: Flags,
    pub(crate) server_flags: Flags,
    pub(crate) changed: bool,
    pub(crate) active: bool,
    pub(crate) matched: bool,
    pub(crate) tagged: bool,
    pub(crate) attach_del: bool,
    pub(crate) envelope: Envelope,
    pub(crate) internal_date: Option<DateTime<FixedOffset>>,
    pub(crate) size: u32,
    pub(crate) modseq: ModSeq,
}

impl Message {
    pub(crate) fn new(uid: Uid, flags: Flags) -> Self {
        Message {
            uid,
            msn: 0,
            index: 0,
            server_flags: flags.clone(),
            flags,
            changed: false,
            active: true,
            matched: false,
            tagged: false,
            attach_del: false,
            envelope: Envelope::default(),
            internal_date: None,
            size: 0,
            modseq: 0,
        }
    }

    /// The UID of the message. It never changes.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// The current message sequence number, `None` once the message has been expunged.
    pub fn msn(&self) -> Option<Seq> {
        if self.active && self.msn != EXPUNGED_MSN && self.msn != 0 {
            Some(self.msn)
        } else {
            None
        }
    }

    /// Flags as displayed, including local edits not yet stored on the server.
    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    /// Replace the displayed flags. The message counts as changed until the flags are stored.
    pub fn set_flags(&mut self, flags: Flags) {
        self.changed = flags != self.server_flags;
        self.flags = flags;
    }

    /// Whether the displayed flags differ from what the server has.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the last SEARCH matched this message.
    pub fn is_matched(&self) -> bool {
        self.matched
    }

    pub fn is_tagged(&self) -> bool {
        self.tagged
    }

    /// Select the message for bulk operations.
    pub fn set_tagged(&mut self, tagged: bool) {
        self.tagged = tagged;
    }

    /// Record that attachments were deleted locally, which the server cannot replicate.
    pub fn set_attach_del(&mut self, attach_del: bool) {
        self.attach_del = attach_del;
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn internal_date(&self) -> Option<&DateTime<FixedOffset>> {
        self.internal_date.as_ref()
    }

    /// `RFC822.SIZE` of the message.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub(crate) fn deactivate(&mut self) {
        self.index = usize::MAX;
        self.msn = EXPUNGED_MSN;
        self.active = false;
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    message: Option<Message>,
}

/// Slab of message handles with generation-checked keys.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Arena {
    pub(crate) fn insert(&mut self, message: Message) -> MessageKey {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.message = Some(message);
            return MessageKey {
                slot,
                generation: entry.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            message: Some(message),
        });
        MessageKey {
            slot: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, key: MessageKey) -> Option<&Message> {
        self.slots
            .get(key.slot as usize)
            .filter(|s| s.generation == key.generation)
            .and_then(|s| s.message.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: MessageKey) -> Option<&mut Message> {
        self.slots
            .get_mut(key.slot as usize)
            .filter(|s| s.generation == key.generation)
            .and_then(|s| s.message.as_mut())
    }

    pub(crate) fn remove(&mut self, key: MessageKey) -> Option<Message> {
        let slot = self.slots.get_mut(key.slot as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let message = slot.message.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.slot);
        self.len -= 1;
        Some(message)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (MessageKey, &Message)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.message.as_ref().map(|m| {
                (
                    MessageKey {
                        slot: i as u32,
                        generation: s.generation,
                    },
                    m,
                )
            })
        })
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.slots.iter_mut().filter_map(|s| s.message.as_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn clear(&mut self) {
        // bump generations so keys handed out earlier stay dead
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.message.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(i as u32);
            }
        }
        self.len = 0;
    }
}

/// MSN → handle. Slot `i` holds the message with MSN `i + 1`.
#[derive(Debug, Default)]
pub(crate) struct MsnIndex {
    slots: Vec<Option<MessageKey>>,
}

impl MsnIndex {
    /// Make room for `n` messages without changing the highest MSN.
    pub(crate) fn reserve(&mut self, n: Seq) {
        let n = n as usize;
        if n > self.slots.capacity() {
            self.slots.reserve(n - self.slots.len());
        }
    }

    /// The highest MSN that has a slot.
    pub(crate) fn highest(&self) -> Seq {
        self.slots.len() as Seq
    }

    pub(crate) fn get(&self, msn: Seq) -> Option<MessageKey> {
        if msn == 0 {
            return None;
        }
        self.slots.get(msn as usize - 1).copied().flatten()
    }

    pub(crate) fn set(&mut self, msn: Seq, key: Option<MessageKey>) {
        if msn == 0 {
            return;
        }
        let i = msn as usize - 1;
        if i >= self.slots.len() {
            self.slots.resize(i + 1, None);
        }
        self.slots[i] = key;
    }

    pub(crate) fn shrink(&mut self, n: Seq) {
        let len = self.slots.len().saturating_sub(n as usize);
        self.slots.truncate(len);
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }
}

bitflags! {
    /// Work deferred until no command is in flight.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct Reopen: u8 {
        /// Deferred actions may run now.
        const ALLOW = 1;
        /// Messages were expunged and wait for compaction.
        const EXPUNGE_PENDING = 1 << 1;
        /// EXISTS announced messages whose headers are not fetched yet.
        const NEWMAIL_PENDING = 1 << 2;
        /// The client itself asked for the expunge.
        const EXPUNGE_EXPECTED = 1 << 3;
    }
}

bitflags! {
    /// What changed in the selected mailbox since the front end last asked.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MailboxChanges: u8 {
        /// New messages were added.
        const NEW_MAIL = 1;
        /// Messages were expunged by another client and the mailbox was renumbered.
        const EXPUNGED = 1 << 1;
        /// Another client changed flags.
        const FLAGS = 1 << 2;
        /// Server changes collided with local edits; reopening the mailbox is advisable.
        const RESYNC = 1 << 3;
    }
}

/// The selected mailbox and everything known about its messages.
#[derive(Debug)]
pub struct Mailbox {
    pub(crate) name: String,
    pub(crate) readonly: bool,
    pub(crate) uid_validity: u32,
    pub(crate) uid_next: Uid,
    pub(crate) modseq: ModSeq,
    pub(crate) new_mail_count: Seq,
    pub(crate) reopen: Reopen,
    pub(crate) changes: MailboxChanges,
    pub(crate) rights: Rights,
    pub(crate) flags: Vec<String>,
    pub(crate) permanent_flags: Vec<String>,
    /// Set while MSNs come from a cached snapshot rather than the live server.
    pub(crate) replaying: bool,
    messages: Arena,
    pub(crate) msn: MsnIndex,
    uid_hash: HashMap<Uid, MessageKey>,
    id_index: HashMap<String, MessageKey>,
    subject_index: HashMap<String, Vec<MessageKey>>,
}

impl Mailbox {
    pub(crate) fn new(name: &str) -> Self {
        Mailbox {
            name: name.to_string(),
            readonly: false,
            uid_validity: 0,
            uid_next: 0,
            modseq: 0,
            new_mail_count: 0,
            reopen: Reopen::empty(),
            changes: MailboxChanges::empty(),
            rights: Rights::empty(),
            flags: Vec::new(),
            permanent_flags: Vec::new(),
            replaying: false,
            messages: Arena::default(),
            msn: MsnIndex::default(),
            uid_hash: HashMap::new(),
            id_index: HashMap::new(),
            subject_index: HashMap::new(),
        }
    }

    /// The mailbox name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn uid_validity(&self) -> u32 {
        self.uid_validity
    }

    pub fn uid_next(&self) -> Uid {
        self.uid_next
    }

    /// `HIGHESTMODSEQ` as reported at selection time, zero without CONDSTORE.
    pub fn highest_modseq(&self) -> ModSeq {
        self.modseq
    }

    /// The rights reported by MYRIGHTS.
    pub fn rights(&self) -> Rights {
        self.rights
    }

    /// Number of message handles, including expunged ones that have not been compacted.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.len() == 0
    }

    /// Highest message sequence number known.
    pub fn max_msn(&self) -> Seq {
        self.msn.highest()
    }

    pub fn by_uid(&self, uid: Uid) -> Option<&Message> {
        self.uid_hash.get(&uid).and_then(|&k| self.messages.get(k))
    }

    pub fn by_uid_mut(&mut self, uid: Uid) -> Option<&mut Message> {
        let key = *self.uid_hash.get(&uid)?;
        self.messages.get_mut(key)
    }

    pub fn by_msn(&self, msn: Seq) -> Option<&Message> {
        self.msn.get(msn).and_then(|k| self.messages.get(k))
    }

    /// Look a message up by its `Message-ID`.
    pub fn by_message_id(&self, id: &str) -> Option<&Message> {
        self.id_index.get(id).and_then(|&k| self.messages.get(k))
    }

    /// Messages sharing a normalized subject, in insertion order.
    pub fn by_subject(&self, subject: &str) -> Vec<&Message> {
        self.subject_index
            .get(&normalize_subject(subject))
            .map(|keys| keys.iter().filter_map(|&k| self.messages.get(k)).collect())
            .unwrap_or_default()
    }

    /// Active messages in MSN order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        (1..=self.msn.highest()).filter_map(move |msn| self.by_msn(msn))
    }

    pub(crate) fn key_by_uid(&self, uid: Uid) -> Option<MessageKey> {
        self.uid_hash.get(&uid).copied()
    }

    pub(crate) fn get(&self, key: MessageKey) -> Option<&Message> {
        self.messages.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: MessageKey) -> Option<&mut Message> {
        self.messages.get_mut(key)
    }

    pub(crate) fn messages_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.messages.iter_mut()
    }

    /// Add a handle at `msn` and register it with the UID hash and the auxiliary indexes.
    pub(crate) fn insert(&mut self, msn: Seq, mut message: Message) -> MessageKey {
        message.msn = msn;
        message.index = msn.saturating_sub(1) as usize;
        let uid = message.uid;
        let message_id = message.envelope.message_id.clone();
        let subject = message.envelope.subject.as_deref().map(normalize_subject);

        let key = self.messages.insert(message);
        self.msn.set(msn, Some(key));
        self.uid_hash.insert(uid, key);
        if let Some(id) = message_id {
            self.id_index.insert(id, key);
        }
        if let Some(subject) = subject {
            self.subject_index.entry(subject).or_default().push(key);
        }
        key
    }

    /// Apply an EXPUNGE for `msn`. Returns false when the MSN is out of range.
    pub(crate) fn expunge_msn(&mut self, msn: Seq) -> bool {
        let highest = self.msn.highest();
        if msn == 0 || msn > highest {
            log::debug!("EXPUNGE for unknown message number {}", msn);
            return false;
        }
        if let Some(key) = self.msn.get(msn) {
            self.deactivate(key);
        }
        self.shift_down(msn);
        self.reopen |= Reopen::EXPUNGE_PENDING;
        true
    }

    /// Apply one UID of a VANISHED response. Returns false when the UID is unknown or its
    /// handle is out of step with the MSN index.
    pub(crate) fn vanish_uid(&mut self, uid: Uid, renumber: bool) -> bool {
        let key = match self.uid_hash.get(&uid) {
            Some(&key) => key,
            None => return false,
        };
        let msn = match self.messages.get(key) {
            Some(m) => m.msn,
            None => return false,
        };
        self.deactivate(key);
        if msn < 1 || msn > self.msn.highest() {
            log::debug!("VANISHED: msn for UID {} is incorrect", uid);
            return false;
        }
        if self.msn.get(msn) != Some(key) {
            log::debug!("VANISHED: msn {} is incorrect for UID {}", msn, uid);
            return false;
        }
        self.msn.set(msn, None);
        if renumber {
            self.shift_down(msn);
        }
        self.reopen |= Reopen::EXPUNGE_PENDING;
        true
    }

    fn deactivate(&mut self, key: MessageKey) {
        if let Some(message) = self.messages.get_mut(key) {
            message.deactivate();
            let uid = message.uid;
            if self.uid_hash.get(&uid) == Some(&key) {
                self.uid_hash.remove(&uid);
            }
        }
    }

    /// Close the gap at `msn`: everything above moves down one position.
    fn shift_down(&mut self, msn: Seq) {
        let highest = self.msn.highest();
        for cur in msn..highest {
            let key = self.msn.get(cur + 1);
            if let Some(message) = key.and_then(|k| self.messages.get_mut(k)) {
                message.msn -= 1;
                message.index = message.index.saturating_sub(1);
            }
            self.msn.set(cur, key);
        }
        self.msn.shrink(1);
    }

    /// Drop every expunged handle for good. Returns their UIDs so cached copies can go too.
    pub(crate) fn compact(&mut self) -> Vec<Uid> {
        let dead: Vec<MessageKey> = self
            .messages
            .iter()
            .filter(|(_, m)| !m.active)
            .map(|(k, _)| k)
            .collect();
        let mut uids = Vec::with_capacity(dead.len());
        for key in dead {
            if let Some(message) = self.messages.remove(key) {
                if let Some(id) = &message.envelope.message_id {
                    if self.id_index.get(id) == Some(&key) {
                        self.id_index.remove(id);
                    }
                }
                if let Some(subject) = message.envelope.subject.as_deref() {
                    if let Some(keys) = self.subject_index.get_mut(&normalize_subject(subject)) {
                        keys.retain(|&k| k != key);
                    }
                }
                uids.push(message.uid);
            }
        }
        self.subject_index.retain(|_, keys| !keys.is_empty());

        // renumber sort positions to follow the MSNs
        for msn in 1..=self.msn.highest() {
            if let Some(message) = self.msn.get(msn).and_then(|k| self.messages.get_mut(k)) {
                message.index = msn as usize - 1;
            }
        }
        uids
    }

    /// Forget every message and index.
    pub(crate) fn reset_messages(&mut self) {
        self.messages.clear();
        self.msn.clear();
        self.uid_hash.clear();
        self.id_index.clear();
        self.subject_index.clear();
    }

    /// Whether every handle agrees with the MSN index and the UID hash.
    pub(crate) fn is_consistent(&self) -> bool {
        let highest = self.msn.highest();
        for (key, message) in self.messages.iter() {
            if message.msn < 1 || message.msn > highest {
                log::debug!("UID {} has msn {} beyond {}", message.uid, message.msn, highest);
                return false;
            }
            if self.msn.get(message.msn) != Some(key) {
                log::debug!("msn {} does not point at UID {}", message.msn, message.uid);
                return false;
            }
            if self.uid_hash.get(&message.uid) != Some(&key) {
                log::debug!("UID {} does not point at its handle", message.uid);
                return false;
            }
        }
        true
    }

    /// UIDs in MSN order, with 0 for slots that have no handle.
    pub(crate) fn uid_seqset(&self) -> String {
        let mut builder = SeqsetBuilder::new();
        for msn in 1..=self.msn.highest() {
            builder.push(self.by_msn(msn).map(|m| m.uid).unwrap_or(0));
        }
        builder.build()
    }

    pub(crate) fn clear_matched(&mut self) {
        for message in self.messages.iter_mut() {
            message.matched = false;
        }
    }
}

/// Subject with reply and forward prefixes removed, for grouping.
fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_ascii_lowercase();
        let stripped = ["re:", "fwd:", "fw:", "aw:"]
            .iter()
            .find(|p| lower.starts_with(*p))
            .map(|p| s[p.len()..].trim_start());
        match stripped {
            Some(rest) => s = rest,
            None => break,
        }
    }
    s.to_lowercase()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn message(uid: Uid) -> Message {
        Message::new(uid, Flags::default())
    }

    /// Every active handle sits at its MSN and no two share one.
    pub(crate) fn assert_msns_consistent(mailbox: &Mailbox) {
        let mut seen = std::collections::HashSet::new();
        for (key, m) in mailbox.messages.iter().filter(|(_, m)| m.active) {
            assert!(seen.insert(m.msn), "msn {} used twice", m.msn);
            assert_eq!(mailbox.msn.get(m.msn), Some(key), "uid {} not at msn {}", m.uid, m.msn);
        }
    }

    fn mailbox_with(uids: &[Uid]) -> (Mailbox, Vec<MessageKey>) {
        let mut mailbox = Mailbox::new("INBOX");
        let keys = uids
            .iter()
            .enumerate()
            .map(|(i, &uid)| mailbox.insert(i as Seq + 1, message(uid)))
            .collect();
        (mailbox, keys)
    }

    #[test]
    fn expunge_renumbers() {
        let (mut mailbox, keys) = mailbox_with(&[10, 11, 12]);
        assert!(mailbox.expunge_msn(2));

        assert_eq!(mailbox.max_msn(), 2);
        assert_eq!(mailbox.get(keys[0]).unwrap().msn(), Some(1));
        assert_eq!(mailbox.get(keys[2]).unwrap().msn(), Some(2));
        assert_eq!(mailbox.get(keys[1]).unwrap().msn(), None);
        assert!(!mailbox.get(keys[1]).unwrap().is_active());
        assert_eq!(mailbox.get(keys[1]).unwrap().uid(), 11);
        assert!(mailbox.by_uid(11).is_none());
        assert!(mailbox.reopen.contains(Reopen::EXPUNGE_PENDING));
        assert_msns_consistent(&mailbox);
    }

    #[test]
    fn expunge_out_of_range() {
        let (mut mailbox, _) = mailbox_with(&[10]);
        assert!(!mailbox.expunge_msn(0));
        assert!(!mailbox.expunge_msn(2));
        assert_eq!(mailbox.max_msn(), 1);
        assert!(!mailbox.reopen.contains(Reopen::EXPUNGE_PENDING));
    }

    #[test]
    fn vanish_without_renumbering() {
        let (mut mailbox, keys) = mailbox_with(&[10, 11, 12]);
        assert!(mailbox.vanish_uid(11, false));
        assert_eq!(mailbox.max_msn(), 3);
        assert_eq!(mailbox.get(keys[2]).unwrap().msn(), Some(3));
        assert!(mailbox.by_msn(2).is_none());
        assert!(mailbox.by_uid(11).is_none());
        assert_msns_consistent(&mailbox);
    }

    #[test]
    fn vanish_with_renumbering() {
        let (mut mailbox, keys) = mailbox_with(&[10, 11, 12]);
        assert!(mailbox.vanish_uid(10, true));
        assert_eq!(mailbox.max_msn(), 2);
        assert_eq!(mailbox.get(keys[1]).unwrap().msn(), Some(1));
        assert_eq!(mailbox.get(keys[2]).unwrap().msn(), Some(2));
        assert!(!mailbox.vanish_uid(99, true));
        assert_msns_consistent(&mailbox);
    }

    #[test]
    fn compaction_drops_dead_handles() {
        let (mut mailbox, keys) = mailbox_with(&[10, 11, 12, 13, 14]);
        mailbox.expunge_msn(3);
        mailbox.expunge_msn(1);
        let mut gone = mailbox.compact();
        gone.sort();
        assert_eq!(gone, vec![10, 12]);
        assert_eq!(mailbox.len(), 3);
        assert!(mailbox.get(keys[0]).is_none());
        assert_eq!(
            mailbox.messages().map(|m| m.uid()).collect::<Vec<_>>(),
            vec![11, 13, 14]
        );
        assert!(mailbox.is_consistent());
    }

    #[test]
    fn stale_keys_do_not_resolve() {
        let mut arena = Arena::default();
        let a = arena.insert(message(1));
        arena.remove(a);
        let b = arena.insert(message(2));
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b).unwrap().uid, 2);
        arena.clear();
        assert!(arena.get(b).is_none());
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn duplicate_uid_is_inconsistent() {
        let (mut mailbox, _) = mailbox_with(&[10, 11]);
        assert!(mailbox.is_consistent());
        mailbox.insert(3, message(10));
        assert!(!mailbox.is_consistent());
    }

    #[test]
    fn seqset_snapshot() {
        let mut mailbox = Mailbox::new("INBOX");
        mailbox.insert(1, message(3));
        mailbox.insert(2, message(4));
        mailbox.insert(4, message(9));
        assert_eq!(mailbox.uid_seqset(), "3:4,0,9");
    }

    #[test]
    fn auxiliary_indexes() {
        let mut mailbox = Mailbox::new("INBOX");
        let mut m = message(5);
        m.envelope.message_id = Some("abc@example.com".into());
        m.envelope.subject = Some("Re: Fwd: Lunch".into());
        mailbox.insert(1, m);
        assert_eq!(mailbox.by_message_id("abc@example.com").unwrap().uid(), 5);
        assert_eq!(mailbox.by_subject("lunch").len(), 1);
        mailbox.reset_messages();
        assert!(mailbox.by_message_id("abc@example.com").is_none());
        assert!(mailbox.by_subject("lunch").is_empty());
    }
}
