use std::collections::HashMap;
use std::fmt;

use super::Uid;

/// The counters of one mailbox as reported by
/// [`STATUS`](https://tools.ietf.org/html/rfc3501#section-6.3.10).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MailboxStatus {
    /// The mailbox name, as sent by the server.
    pub name: String,
    /// The number of messages in the mailbox.
    pub messages: u32,
    /// The number of messages with the `\Recent` flag set.
    pub recent: u32,
    /// The number of messages which do not have the `\Seen` flag set.
    pub unseen: u32,
    /// The next unique identifier value of the mailbox.
    pub uid_next: Uid,
    /// The unique identifier validity value of the mailbox.
    pub uid_validity: u32,
    /// Whether the mailbox received mail since it was last opened.
    pub has_new: bool,
}

impl fmt::Display for MailboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: messages: {}, recent: {}, unseen: {}, uid_next: {}, uid_validity: {}{}",
            self.name,
            self.messages,
            self.recent,
            self.unseen,
            self.uid_next,
            self.uid_validity,
            if self.has_new { ", new mail" } else { "" }
        )
    }
}

/// Last known status of every mailbox the session tracks for new mail.
#[derive(Clone, Debug, Default)]
pub struct StatusCache {
    entries: HashMap<String, MailboxStatus>,
}

impl StatusCache {
    /// Start tracking `name`. Tracking an already tracked mailbox keeps its counters.
    pub fn track(&mut self, name: &str) {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| MailboxStatus {
                name: name.to_string(),
                ..MailboxStatus::default()
            });
    }

    /// Whether `name` is tracked.
    pub fn is_tracked(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The last known status of `name`.
    pub fn get(&self, name: &str) -> Option<&MailboxStatus> {
        self.entries.get(name)
    }

    /// The names of all tracked mailboxes, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Clear the new-mail marker, typically because the mailbox was opened.
    pub fn mark_read(&mut self, name: &str, uid_next: Uid) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.has_new = false;
            entry.uid_next = uid_next;
        }
    }

    /// Fold a fresh STATUS response into the cache and decide whether the mailbox has new mail.
    ///
    /// Returns `None` when the mailbox is not tracked.
    pub(crate) fn update(&mut self, fresh: &MailboxStatus, check_recent: bool) -> Option<&MailboxStatus> {
        let entry = self.entries.get_mut(&fresh.name)?;
        let old_validity = entry.uid_validity;
        let old_next = entry.uid_next;

        entry.messages = fresh.messages;
        entry.recent = fresh.recent;
        entry.unseen = fresh.unseen;
        entry.uid_next = fresh.uid_next;
        entry.uid_validity = fresh.uid_validity;

        entry.has_new = if old_validity != 0 && old_validity == fresh.uid_validity {
            fresh.uid_next > old_next && fresh.unseen > 0
        } else if old_validity == 0 && old_next == 0 && check_recent {
            fresh.recent > 0
        } else {
            fresh.unseen > 0
        };

        // keep reporting new mail until the mailbox is opened
        if entry.has_new {
            entry.uid_next = old_next;
        }
        Some(entry)
    }
}
