//! Adds support for the IMAP IDLE command specificed in [RFC
//! 2177](https://tools.ietf.org/html/rfc2177), and the periodic mailbox check built on it.

use std::io::{Read, Write};
use std::time::Duration;

use crate::client::{Session, State};
use crate::command::{ExecFlags, Status};
use crate::conn::SetReadTimeout;
use crate::error::{Error, Result};
use crate::index::MailboxChanges;
use crate::types::Capability;

impl<T: Read + Write + SetReadTimeout> Session<T> {
    /// Issue `IDLE` and wait for the server's continuation request.
    ///
    /// The session stays in [`State::Idle`] until the next command goes out; the `DONE` that
    /// ends the IDLE is queued now and written in front of that command. Calling this while
    /// already idle ends the current IDLE and starts a fresh one, which is how the connection
    /// is kept alive.
    pub fn idle_enter(&mut self) -> Result<()> {
        self.selected()?;
        if !self.capabilities.contains(Capability::IDLE) {
            return Err(Error::No("server does not support IDLE".to_string()));
        }

        self.start(Some("IDLE"), ExecFlags::empty())?;
        let timeout = self.config.poll_timeout;
        if !self.poll(timeout)? {
            self.frontend.error("Connection to server timed out");
            self.handle_fatal();
            return Err(Error::Timeout);
        }
        loop {
            match self.step()? {
                Status::Continue => continue,
                Status::Respond => break,
                status => {
                    log::warn!("IDLE refused: {}", String::from_utf8_lossy(&self.last_tagged));
                    return Err(self.command_error(status));
                }
            }
        }

        self.queue_raw(b"DONE\r\n");
        self.state = State::Idle;
        Ok(())
    }

    /// Look for changes to the selected mailbox.
    ///
    /// Unless `force` is set, the check idles when IDLE is enabled and supported, re-issuing
    /// the IDLE once `keepalive` has passed without traffic. Responses that arrived while
    /// idle are handled without blocking. Otherwise a `NOOP` is sent when forced or when the
    /// connection has been quiet for `keepalive`.
    ///
    /// Returns what changed since the last check and forgets it.
    pub fn check_mailbox(&mut self, force: bool) -> Result<MailboxChanges> {
        self.selected()?;
        let keepalive = self.config.keepalive;
        let use_idle = self.config.use_idle && self.capabilities.contains(Capability::IDLE);

        if !force
            && use_idle
            && (self.state != State::Idle || self.last_read.elapsed() >= keepalive)
        {
            self.idle_enter()?;
        }

        if self.state == State::Idle {
            loop {
                match self.poll(Duration::ZERO) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        log::debug!("poll failed, disabling IDLE");
                        self.capabilities.remove(Capability::IDLE);
                        return Err(e);
                    }
                }
                if self.step()? != Status::Continue {
                    // the server ended the IDLE on its own
                    log::debug!("IDLE terminated by server");
                    self.clear_queued();
                    self.state = State::Selected;
                    break;
                }
            }
        }

        if force || (self.state != State::Idle && self.last_read.elapsed() >= keepalive) {
            self.exec("NOOP", ExecFlags::POLL)?;
        }

        self.finish()?;
        let mailbox = self.selected_mut()?;
        Ok(std::mem::replace(&mut mailbox.changes, MailboxChanges::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::index::tests::message;
    use crate::index::{Mailbox, Reopen};
    use crate::mock_stream::MockStream;
    use crate::types::{Capabilities, Seq};

    fn idle_session(response: &str, config: Config) -> Session<MockStream> {
        let stream = MockStream::new(response.as_bytes().to_vec()).with_block();
        let mut session = Session::new(stream, config);
        session.capabilities = Capabilities::parse(["IMAP4rev1", "IDLE"]);
        let mut mailbox = Mailbox::new("INBOX");
        for (i, uid) in [10, 20].into_iter().enumerate() {
            mailbox.insert(i as Seq + 1, message(uid));
        }
        mailbox.reopen = Reopen::ALLOW;
        session.mailbox = Some(mailbox);
        session.state = State::Selected;
        session
    }

    fn written(session: &Session<MockStream>) -> String {
        String::from_utf8_lossy(&session.stream.get_ref().written_buf).into_owned()
    }

    #[test]
    fn idle_then_command_sends_done_first() {
        let response = "+ idling\r\n\
                        a0000 OK IDLE terminated\r\n\
                        a0001 OK NOOP completed\r\n";
        let mut session = idle_session(response, Config::default());
        session.idle_enter().unwrap();
        assert_eq!(session.state(), State::Idle);
        assert_eq!(written(&session), "a0000 IDLE\r\n");

        session.noop().unwrap();
        assert_eq!(session.state(), State::Selected);
        assert_eq!(written(&session), "a0000 IDLE\r\nDONE\r\na0001 NOOP\r\n");
    }

    #[test]
    fn idle_refused() {
        let mut session = idle_session("a0000 NO not now\r\n", Config::default());
        match session.idle_enter() {
            Err(Error::No(text)) => assert_eq!(text, "not now"),
            other => panic!("expected NO, got {:?}", other),
        }
        assert_eq!(session.state(), State::Selected);
    }

    #[test]
    fn idle_needs_capability() {
        let mut session = idle_session("", Config::default());
        session.capabilities = Capabilities::parse(["IMAP4rev1"]);
        assert!(matches!(session.idle_enter(), Err(Error::No(_))));
        assert!(written(&session).is_empty());
    }

    #[test]
    fn check_while_idle_handles_expunge() {
        let mut session = idle_session("+ idling\r\n* 2 EXPUNGE\r\n", Config::default());
        let changes = session.check_mailbox(false).unwrap();
        assert_eq!(changes, MailboxChanges::EXPUNGED);
        assert_eq!(session.state(), State::Idle);
        let mailbox = session.mailbox().unwrap();
        assert_eq!(mailbox.len(), 1);
        assert!(mailbox.by_uid(20).is_none());

        // the changes were handed out once
        assert!(session.check_mailbox(false).unwrap().is_empty());
        assert_eq!(written(&session), "a0000 IDLE\r\n");
    }

    #[test]
    fn keepalive_reissues_idle() {
        let response = "+ idling\r\n\
                        a0000 OK IDLE terminated\r\n\
                        + idling\r\n";
        let config = Config {
            keepalive: Duration::ZERO,
            ..Config::default()
        };
        let mut session = idle_session(response, config);
        session.idle_enter().unwrap();
        assert!(session.check_mailbox(false).unwrap().is_empty());
        assert_eq!(session.state(), State::Idle);
        assert_eq!(written(&session), "a0000 IDLE\r\nDONE\r\na0001 IDLE\r\n");
    }

    #[test]
    fn forced_check_sends_noop() {
        let config = Config {
            use_idle: false,
            ..Config::default()
        };
        let mut session = idle_session("* 1 FETCH (FLAGS (\\Seen))\r\na0000 OK\r\n", config);
        let changes = session.check_mailbox(true).unwrap();
        assert_eq!(changes, MailboxChanges::FLAGS);
        assert_eq!(written(&session), "a0000 NOOP\r\n");
        assert!(session.mailbox().unwrap().by_uid(10).unwrap().flags().seen);
    }

    #[test]
    fn quiet_check_without_idle_does_nothing() {
        let config = Config {
            use_idle: false,
            ..Config::default()
        };
        let mut session = idle_session("", config);
        assert!(session.check_mailbox(false).unwrap().is_empty());
        assert!(written(&session).is_empty());
    }
}
