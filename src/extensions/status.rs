//! Mailbox counters via [STATUS](https://tools.ietf.org/html/rfc3501#section-6.3.10), and the
//! new-mail check across tracked mailboxes.

use std::io::{Read, Write};

use crate::client::{Session, State};
use crate::command::ExecFlags;
use crate::conn::SetReadTimeout;
use crate::error::{Error, Result};
use crate::types::MailboxStatus;
use crate::utils::validate_str;

const STATUS_ITEMS: &str = "(MESSAGES RECENT UIDNEXT UIDVALIDITY UNSEEN)";

impl<T: Read + Write + SetReadTimeout> Session<T> {
    /// The counters of mailbox `name`.
    ///
    /// The selected mailbox is answered from what the session already knows; any other mailbox
    /// is asked with `STATUS`. The [`StatusCache`](crate::StatusCache) is left alone, so the
    /// new-mail state of a tracked mailbox only moves with [`Session::poll_mailboxes`].
    pub fn mailbox_status(&mut self, name: &str) -> Result<MailboxStatus> {
        if let Ok(mailbox) = self.selected() {
            if mailbox.name() == name {
                return Ok(MailboxStatus {
                    name: name.to_string(),
                    messages: mailbox.max_msn(),
                    recent: 0,
                    unseen: mailbox.messages().filter(|m| !m.flags().seen).count() as u32,
                    uid_next: mailbox.uid_next(),
                    uid_validity: mailbox.uid_validity(),
                    has_new: false,
                });
            }
        }
        self.authenticated()?;

        let command = format!("STATUS {} {}", validate_str(name)?, STATUS_ITEMS);
        self.status_capture = Some(Vec::new());
        let res = self.exec(&command, ExecFlags::empty());
        let statuses = self.status_capture.take().unwrap_or_default();
        res?;

        // the server may spell the name differently, e.g. INBOX
        statuses
            .iter()
            .find(|s| s.name == name)
            .or_else(|| statuses.first())
            .cloned()
            .ok_or_else(|| Error::No(format!("no STATUS returned for {}", name)))
    }

    /// Ask for the status of every tracked mailbox except the selected one, pipelining the
    /// requests. Returns the refreshed entries; `has_new` tells which received new mail.
    ///
    /// A mailbox the server refuses to report on keeps its previous entry.
    pub fn poll_mailboxes(&mut self) -> Result<Vec<MailboxStatus>> {
        self.authenticated()?;
        let selected = self.mailbox.as_ref().map(|m| m.name().to_string());
        let names: Vec<String> = self
            .status_cache
            .names()
            .into_iter()
            .filter(|n| Some(n) != selected.as_ref())
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }

        for name in &names {
            let command = format!("STATUS {} {}", validate_str(name)?, STATUS_ITEMS);
            self.start(Some(&command), ExecFlags::QUEUE)?;
        }
        self.drain()?;

        let statuses: Vec<MailboxStatus> = names
            .iter()
            .filter_map(|n| self.status_cache.get(n).cloned())
            .collect();
        log::debug!(
            "{} of {} mailboxes have new mail",
            statuses.iter().filter(|s| s.has_new).count(),
            statuses.len()
        );
        Ok(statuses)
    }

    fn authenticated(&self) -> Result<()> {
        if self.state < State::Authenticated || self.state == State::Fatal {
            return Err(Error::Fatal);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::index::tests::message;
    use crate::index::{Mailbox, Reopen};
    use crate::mock_stream::MockStream;

    fn session(response: &str) -> Session<MockStream> {
        let mut session = Session::new(MockStream::new(response.as_bytes().to_vec()), Config::default());
        session.state = State::Authenticated;
        session
    }

    fn written(session: &Session<MockStream>) -> String {
        String::from_utf8_lossy(&session.stream.get_ref().written_buf).into_owned()
    }

    #[test]
    fn status_of_other_mailbox() {
        let mut session = session(
            "* STATUS Lists (MESSAGES 12 RECENT 2 UIDNEXT 40 UIDVALIDITY 9 UNSEEN 3)\r\n\
             a0000 OK STATUS completed\r\n",
        );
        let status = session.mailbox_status("Lists").unwrap();
        assert_eq!(
            written(&session),
            "a0000 STATUS \"Lists\" (MESSAGES RECENT UIDNEXT UIDVALIDITY UNSEEN)\r\n"
        );
        assert_eq!(status.messages, 12);
        assert_eq!(status.recent, 2);
        assert_eq!(status.uid_next, 40);
        assert_eq!(status.uid_validity, 9);
        assert_eq!(status.unseen, 3);
    }

    #[test]
    fn status_leaves_tracked_entry_alone() {
        let mut session = session(
            "* STATUS Lists (MESSAGES 12 RECENT 2 UIDNEXT 40 UIDVALIDITY 9 UNSEEN 3)\r\n\
             a0000 OK STATUS completed\r\n",
        );
        session.status_cache_mut().track("Lists");
        let before = session.status_cache().get("Lists").cloned();

        let status = session.mailbox_status("Lists").unwrap();
        assert_eq!(status.uid_next, 40);
        assert_eq!(session.status_cache().get("Lists").cloned(), before);
        assert!(!session.status_cache().get("Lists").unwrap().has_new);
    }

    #[test]
    fn status_of_selected_mailbox_is_local() {
        let mut session = session("");
        let mut mailbox = Mailbox::new("INBOX");
        mailbox.insert(1, message(4));
        mailbox.insert(2, message(7));
        mailbox.by_uid_mut(4).unwrap().flags.seen = true;
        mailbox.uid_validity = 3;
        mailbox.uid_next = 8;
        mailbox.reopen = Reopen::ALLOW;
        session.mailbox = Some(mailbox);
        session.state = State::Selected;

        let status = session.mailbox_status("INBOX").unwrap();
        assert_eq!(status.messages, 2);
        assert_eq!(status.unseen, 1);
        assert_eq!(status.uid_next, 8);
        assert_eq!(status.uid_validity, 3);
        assert!(written(&session).is_empty());
    }

    #[test]
    fn status_refused() {
        let mut session = session("a0000 NO no such mailbox\r\n");
        assert!(matches!(session.mailbox_status("Gone"), Err(Error::No(_))));
        assert!(session.status_capture.is_none());
    }

    #[test]
    fn status_needs_login() {
        let mut session = session("");
        session.state = State::Connected;
        assert!(session.mailbox_status("INBOX").is_err());
        assert!(written(&session).is_empty());
    }

    #[test]
    fn poll_pipelines_tracked_mailboxes() {
        let mut session = session(
            "* STATUS Lists (MESSAGES 12 RECENT 2 UIDNEXT 40 UIDVALIDITY 9 UNSEEN 3)\r\n\
             a0000 OK\r\n\
             a0001 NO mailbox is gone\r\n",
        );
        session.status_cache_mut().track("Lists");
        session.status_cache_mut().track("Old");

        let statuses = session.poll_mailboxes().unwrap();
        assert_eq!(
            written(&session),
            "a0000 STATUS \"Lists\" (MESSAGES RECENT UIDNEXT UIDVALIDITY UNSEEN)\r\n\
             a0001 STATUS \"Old\" (MESSAGES RECENT UIDNEXT UIDVALIDITY UNSEEN)\r\n"
        );
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "Lists");
        assert!(statuses[0].has_new);
        assert_eq!(statuses[1].name, "Old");
        assert!(!statuses[1].has_new);
    }

    #[test]
    fn poll_skips_selected_mailbox() {
        let mut session = session("");
        session.status_cache_mut().track("INBOX");
        session.mailbox = Some(Mailbox::new("INBOX"));
        session.state = State::Selected;
        assert!(session.poll_mailboxes().unwrap().is_empty());
        assert!(written(&session).is_empty());
    }
}
