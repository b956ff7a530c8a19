use std::io::{self, BufRead, Read, Write};
use std::str;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use bufstream::BufStream;
use tempfile::NamedTempFile;

use super::authenticator::Authenticator;
use super::cache::{BodyCache, HeaderCache};
use super::command::{CommandQueue, CommandState, ExecFlags, Status};
use super::config::Config;
use super::conn::SetReadTimeout;
use super::error::{Error, ParseError, Result};
use super::frontend::{Frontend, Silent};
use super::index::{Mailbox, MailboxChanges, Reopen};
use super::parse;
use super::types::*;
use super::untagged::FetchResponse;
use super::utils::validate_str;

const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

/// Where a session stands in the IMAP state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// No greeting has been read yet, or the connection was closed.
    Disconnected,
    /// The server greeted us; we still have to log in.
    Connected,
    /// Logged in, no mailbox selected.
    Authenticated,
    /// A mailbox is selected.
    Selected,
    /// A mailbox is selected and an IDLE command is outstanding.
    Idle,
    /// The connection failed and cannot be used any more.
    Fatal,
}

/// A connection to an IMAP server and everything the engine knows about it.
///
/// All commands go through a small pipeline: [`Session::start`] queues a tagged command,
/// [`Session::step`] consumes one response line, and [`Session::exec`] does both until the
/// command completes. Untagged responses update the selected [`Mailbox`] as they arrive.
pub struct Session<T: Read + Write + SetReadTimeout> {
    pub(crate) stream: BufStream<T>,
    pub(crate) config: Config,
    pub(crate) state: State,
    pub(crate) capabilities: Capabilities,
    /// Bumped whenever a CAPABILITY list is received.
    pub(crate) capability_updates: u32,
    pub(crate) unicode: bool,
    pub(crate) qresync: bool,
    pub(crate) queue: CommandQueue,
    /// Command text queued but not yet written.
    cmdbuf: Vec<u8>,
    /// The current response line, without CRLF.
    pub(crate) buf: Vec<u8>,
    /// Bytes of a literal announced by the current line and not read yet.
    pub(crate) pending_literal: u64,
    /// The next line is the remainder of a line whose literal was consumed.
    after_literal: bool,
    /// The tagged line that completed the last command.
    pub(crate) last_tagged: Vec<u8>,
    pub(crate) mailbox: Option<Mailbox>,
    pub(crate) status_cache: StatusCache,
    pub(crate) list_capture: Option<Vec<Name>>,
    pub(crate) status_capture: Option<Vec<MailboxStatus>>,
    /// FETCH responses handed to the caller instead of the generic handler.
    pub(crate) fetch_capture: Option<Vec<FetchResponse>>,
    /// Where body literals go while a message is downloaded.
    pub(crate) body_spool: Option<NamedTempFile>,
    pub(crate) delimiter: Option<char>,
    pub(crate) header_cache: Option<Box<dyn HeaderCache>>,
    pub(crate) body_cache: Option<BodyCache>,
    pub(crate) frontend: Box<dyn Frontend>,
    pub(crate) logging_out: bool,
    pub(crate) last_read: Instant,
}

impl<T: Read + Write + SetReadTimeout> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("capabilities", &self.capabilities)
            .field("qresync", &self.qresync)
            .field("mailbox", &self.mailbox.as_ref().map(Mailbox::name))
            .finish()
    }
}

impl<T: Read + Write + SetReadTimeout> Session<T> {
    /// Wrap a connected stream. Nothing is read until [`Session::connect`] or
    /// [`Session::read_greeting`].
    pub fn new(stream: T, config: Config) -> Session<T> {
        let depth = config.pipeline_depth;
        Session {
            stream: BufStream::new(stream),
            config,
            state: State::Disconnected,
            capabilities: Capabilities::default(),
            capability_updates: 0,
            unicode: false,
            qresync: false,
            queue: CommandQueue::new(depth),
            cmdbuf: Vec::new(),
            buf: Vec::new(),
            pending_literal: 0,
            after_literal: false,
            last_tagged: Vec::new(),
            mailbox: None,
            status_cache: StatusCache::default(),
            list_capture: None,
            status_capture: None,
            fetch_capture: None,
            body_spool: None,
            delimiter: None,
            header_cache: None,
            body_cache: None,
            frontend: Box::new(Silent),
            logging_out: false,
            last_read: Instant::now(),
        }
    }

    /// Wrap a stream and read the server greeting.
    pub fn connect(stream: T, config: Config) -> Result<Session<T>> {
        let mut session = Session::new(stream, config);
        if let Some(dir) = session.config.body_cache_dir.clone() {
            session.body_cache = Some(BodyCache::new(dir)?);
        }
        session.read_greeting()?;
        Ok(session)
    }

    /// Route prompts, notices and the interrupt flag through `frontend`.
    pub fn with_frontend(mut self, frontend: Box<dyn Frontend>) -> Self {
        self.frontend = frontend;
        self
    }

    /// Keep header records in `cache`.
    pub fn with_header_cache(mut self, cache: Box<dyn HeaderCache>) -> Self {
        self.header_cache = Some(cache);
        self
    }

    /// Keep downloaded message bodies in `cache`.
    pub fn with_body_cache(mut self, cache: BodyCache) -> Self {
        self.body_cache = Some(cache);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The capabilities the server announced last.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Whether `UTF8=ACCEPT` was enabled.
    pub fn is_unicode(&self) -> bool {
        self.unicode
    }

    /// Whether QRESYNC was enabled.
    pub fn is_qresync(&self) -> bool {
        self.qresync
    }

    /// The selected mailbox.
    pub fn mailbox(&self) -> Option<&Mailbox> {
        self.mailbox.as_ref()
    }

    pub fn mailbox_mut(&mut self) -> Option<&mut Mailbox> {
        self.mailbox.as_mut()
    }

    /// Statuses of the mailboxes tracked for new mail.
    pub fn status_cache(&self) -> &StatusCache {
        &self.status_cache
    }

    pub fn status_cache_mut(&mut self) -> &mut StatusCache {
        &mut self.status_cache
    }

    /// The mechanisms usable with [`Session::authenticate`].
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.capabilities
            .auth_mechanisms()
            .map(str::to_string)
            .collect()
    }

    /// Hand the transport back, flushing anything still buffered.
    pub fn into_inner(self) -> Result<T> {
        Ok(self.stream.into_inner()?)
    }

    pub(crate) fn selected(&self) -> Result<&Mailbox> {
        match self.state {
            State::Selected | State::Idle => self.mailbox.as_ref().ok_or(Error::NotSelected),
            _ => Err(Error::NotSelected),
        }
    }

    pub(crate) fn selected_mut(&mut self) -> Result<&mut Mailbox> {
        match self.state {
            State::Selected | State::Idle => self.mailbox.as_mut().ok_or(Error::NotSelected),
            _ => Err(Error::NotSelected),
        }
    }

    /// Read the server greeting.
    pub fn read_greeting(&mut self) -> Result<()> {
        if let Err(e) = self.read_line() {
            self.handle_fatal();
            return Err(e);
        }
        let line = self.buf.clone();
        let updates = self.capability_updates;
        if line.starts_with(b"* OK") {
            self.state = State::Connected;
        } else if line.starts_with(b"* PREAUTH") {
            self.state = State::Authenticated;
        } else if line.starts_with(b"* BYE") {
            self.state = State::Disconnected;
            return Err(Error::Bye(parse::response_text(&line)));
        } else {
            self.handle_fatal();
            return Err(ParseError::Invalid(line).into());
        }
        self.handle_untagged()?;
        if self.capability_updates == updates {
            self.exec("CAPABILITY", ExecFlags::empty())?;
        }
        if self.state == State::Authenticated {
            self.post_auth(updates)?;
        }
        Ok(())
    }

    /// Log in to the IMAP server.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        if self.capabilities.contains(Capability::LOGINDISABLED) {
            return Err(Error::No("LOGIN is disabled on this server".to_string()));
        }
        let updates = self.capability_updates;
        self.exec(
            &format!("LOGIN {} {}", validate_str(username)?, validate_str(password)?),
            ExecFlags::PASS,
        )?;
        self.post_auth(updates)
    }

    /// Authenticate with the server using the given SASL mechanism.
    pub fn authenticate<A: Authenticator>(
        &mut self,
        auth_type: &str,
        authenticator: &A,
    ) -> Result<()> {
        let updates = self.capability_updates;
        self.start(Some(&format!("AUTHENTICATE {}", auth_type)), ExecFlags::empty())?;
        loop {
            match self.step()? {
                Status::Continue => continue,
                Status::Respond => {
                    let line = str::from_utf8(&self.buf)
                        .map_err(|e| ParseError::DataNotUtf8(self.buf.clone(), e))?;
                    let data = line.trim_start_matches('+').trim();
                    let challenge = general_purpose::STANDARD.decode(data).map_err(|e| {
                        ParseError::Authentication(line.to_string(), Some(e))
                    })?;
                    let response = authenticator.process(&challenge);
                    let mut out = general_purpose::STANDARD
                        .encode(response.as_ref())
                        .into_bytes();
                    out.extend_from_slice(&[CR, LF]);
                    log::trace!("> [SASL response]");
                    self.write_raw(&out)?;
                }
                Status::Ok => break,
                status => return Err(self.command_error(status)),
            }
        }
        self.post_auth(updates)
    }

    /// Refresh capabilities and turn on the extensions we want.
    fn post_auth(&mut self, updates: u32) -> Result<()> {
        self.state = State::Authenticated;
        // capabilities may have changed after login
        if self.capability_updates == updates {
            self.exec("CAPABILITY", ExecFlags::empty())?;
        }
        if !self.capabilities.contains(Capability::ENABLE) {
            return Ok(());
        }
        if self.capabilities.contains(Capability::UTF8_ACCEPT) {
            if let Err(e) = self.exec("ENABLE UTF8=ACCEPT", ExecFlags::FAIL_OK) {
                log::debug!("ENABLE UTF8=ACCEPT failed: {}", e);
            }
        }
        if self.config.use_qresync && self.capabilities.contains(Capability::QRESYNC) {
            if let Err(e) = self.exec("ENABLE QRESYNC", ExecFlags::FAIL_OK) {
                log::debug!("ENABLE QRESYNC failed: {}", e);
            }
        }
        Ok(())
    }

    /// Queue `command` with the next tag and, unless [`ExecFlags::QUEUE`] is given, send
    /// everything queued so far. `None` only sends.
    ///
    /// If the ring of outstanding commands is full, it is drained first.
    pub fn start(&mut self, command: Option<&str>, flags: ExecFlags) -> Result<()> {
        if self.state == State::Fatal {
            return Err(Error::Fatal);
        }
        if let Some(command) = command {
            if self.queue.is_full() {
                log::debug!("draining command pipeline");
                self.drain()?;
            }
            let tag = self.queue.push().ok_or(Error::Fatal)?;
            if flags.contains(ExecFlags::PASS) {
                let verb = command.split(' ').next().unwrap_or(command);
                log::trace!("> {} {} *", tag, verb);
            } else {
                log::trace!("> {} {}", tag, command);
            }
            self.cmdbuf.extend_from_slice(tag.as_bytes());
            self.cmdbuf.push(b' ');
            self.cmdbuf.extend_from_slice(command.as_bytes());
            self.cmdbuf.extend_from_slice(&[CR, LF]);
        }

        if flags.contains(ExecFlags::QUEUE) || self.cmdbuf.is_empty() {
            return Ok(());
        }

        let out = std::mem::take(&mut self.cmdbuf);
        self.write_raw(&out)?;
        // the DONE queued by IDLE went out with this write
        if self.state == State::Idle {
            self.state = State::Selected;
        }
        Ok(())
    }

    /// Read and handle one response line.
    ///
    /// Returns [`Status::Continue`] while commands are outstanding, [`Status::Respond`] for a
    /// continuation request, and the completion status of the command whose tagged line
    /// emptied the ring.
    pub fn step(&mut self) -> Result<Status> {
        if self.state == State::Fatal {
            return Err(Error::Fatal);
        }

        if self.pending_literal > 0 {
            log::debug!("discarding {} byte literal", self.pending_literal);
            let mut sink = io::sink();
            if let Err(e) = self.read_literal(&mut sink) {
                return Err(self.fatal_error(e));
            }
        }
        if let Err(e) = self.read_line() {
            return Err(self.fatal_error(e));
        }
        if std::mem::take(&mut self.after_literal) {
            return Ok(Status::Continue);
        }

        let untagged = self.buf.starts_with(b"* ");
        if untagged || parse::tagged_code(&self.buf).is_ok() {
            if let Err(e) = self.handle_untagged() {
                self.handle_fatal();
                return Err(e);
            }
            if untagged {
                return Ok(Status::Continue);
            }
        }

        if self.buf.starts_with(b"+") {
            return Ok(Status::Respond);
        }

        let (tag, state) = {
            let mut words = parse::words(&self.buf);
            let tag = words.next().unwrap_or("").to_string();
            let state = match words.next().map(str::to_ascii_uppercase).as_deref() {
                Some("OK") => CommandState::Ok,
                Some("NO") => CommandState::No,
                Some("BAD") => CommandState::Bad,
                _ => {
                    log::debug!("unexpected response: {}", String::from_utf8_lossy(&self.buf));
                    return Ok(Status::Continue);
                }
            };
            (tag, state)
        };
        if !self.queue.complete(&tag, state) {
            log::debug!("unexpected tagged response: {}", String::from_utf8_lossy(&self.buf));
            return Ok(Status::Continue);
        }
        self.last_tagged = self.buf.clone();
        self.queue.pop_completed();
        if !self.queue.is_empty() {
            return Ok(Status::Continue);
        }

        // the ring drained on this line, so its command decides
        self.finish()?;
        Ok(match state {
            CommandState::Ok => Status::Ok,
            CommandState::No => Status::No,
            _ => Status::Bad,
        })
    }

    /// Run a command to completion.
    ///
    /// A NO or BAD completion becomes [`Error::No`] or [`Error::Bad`] carrying the server's
    /// text. The full tagged line stays available for response-code checks.
    pub fn exec(&mut self, command: &str, flags: ExecFlags) -> Result<()> {
        self.start(Some(command), flags)?;
        if flags.contains(ExecFlags::QUEUE) {
            return Ok(());
        }
        if flags.contains(ExecFlags::POLL) {
            let timeout = self.config.poll_timeout;
            if !self.poll(timeout)? {
                self.frontend.error("Connection to server timed out");
                self.handle_fatal();
                return Err(Error::Timeout);
            }
        }

        let status = loop {
            match self.step()? {
                Status::Continue => continue,
                Status::Respond => {
                    log::debug!("unexpected continuation request");
                    continue;
                }
                status => break status,
            }
        };
        match status {
            Status::Ok => Ok(()),
            Status::No if flags.contains(ExecFlags::FAIL_OK) => {
                log::debug!("{}", String::from_utf8_lossy(&self.last_tagged));
                Err(self.command_error(status))
            }
            status => {
                log::warn!("{}", String::from_utf8_lossy(&self.last_tagged));
                Err(self.command_error(status))
            }
        }
    }

    /// Send anything queued and read responses until no command is outstanding.
    pub(crate) fn drain(&mut self) -> Result<()> {
        self.start(None, ExecFlags::empty())?;
        while !self.queue.is_empty() {
            self.step()?;
        }
        Ok(())
    }

    pub(crate) fn command_error(&self, status: Status) -> Error {
        let text = parse::response_text(&self.last_tagged);
        match status {
            Status::No => Error::No(text),
            _ => Error::Bad(text),
        }
    }

    /// Deferred work that runs once the command ring is empty.
    pub(crate) fn finish(&mut self) -> Result<()> {
        if self.state == State::Fatal {
            self.handle_fatal();
            return Ok(());
        }
        if self.state < State::Selected {
            return Ok(());
        }
        let (reopen, new_mail_count, max_msn) = match self.mailbox.as_ref() {
            Some(m) if m.reopen.contains(Reopen::ALLOW) => (m.reopen, m.new_mail_count, m.max_msn()),
            _ => return Ok(()),
        };

        if reopen.contains(Reopen::EXPUNGE_PENDING) {
            log::debug!("expunging mailbox");
            self.expunge_mailbox()?;
            if let Some(mailbox) = self.mailbox.as_mut() {
                if !reopen.contains(Reopen::EXPUNGE_EXPECTED) {
                    mailbox.changes |= MailboxChanges::EXPUNGED;
                }
                mailbox.reopen.remove(Reopen::EXPUNGE_PENDING | Reopen::EXPUNGE_EXPECTED);
            }
        }

        if reopen.contains(Reopen::NEWMAIL_PENDING) {
            let max_msn = self.mailbox.as_ref().map(Mailbox::max_msn).unwrap_or(max_msn);
            if new_mail_count > max_msn {
                log::debug!("fetching new mail from {} to {}", max_msn + 1, new_mail_count);
                if let Some(mailbox) = self.mailbox.as_mut() {
                    mailbox.changes |= MailboxChanges::NEW_MAIL;
                }
                self.read_headers(max_msn + 1, new_mail_count, false)?;
            } else if let Some(mailbox) = self.mailbox.as_mut() {
                mailbox.reopen.remove(Reopen::NEWMAIL_PENDING);
            }
        }
        Ok(())
    }

    /// Drop expunged handles for good, along with their cached headers and bodies.
    pub(crate) fn expunge_mailbox(&mut self) -> Result<()> {
        let mailbox = match self.mailbox.as_mut() {
            Some(m) => m,
            None => return Ok(()),
        };
        let gone = mailbox.compact();
        let name = mailbox.name.clone();
        let uid_validity = mailbox.uid_validity;
        for uid in gone {
            if let Some(cache) = self.header_cache.as_mut() {
                cache.delete(&name, &super::cache::uid_key(uid))?;
            }
            if let Some(bodies) = self.body_cache.as_ref() {
                bodies.delete(&name, uid_validity, uid)?;
            }
        }
        Ok(())
    }

    /// Put the session in the fatal state after the connection failed.
    pub(crate) fn handle_fatal(&mut self) {
        self.state = State::Fatal;
        let allow = self
            .mailbox
            .as_ref()
            .map(|m| m.reopen.contains(Reopen::ALLOW))
            .unwrap_or(false);
        if allow {
            self.frontend
                .error("Mailbox closed, will attempt reconnection");
            self.mailbox = None;
        }
        self.queue.clear();
        self.cmdbuf.clear();
        self.buf.clear();
        self.pending_literal = 0;
        self.after_literal = false;
    }

    fn fatal_error(&mut self, e: Error) -> Error {
        self.handle_fatal();
        match e {
            Error::Io(e) => {
                log::error!("connection failed: {}", e);
                Error::ConnectionLost
            }
            e => e,
        }
    }

    /// Drop the connection state without marking the server at fault.
    pub(crate) fn teardown(&mut self) {
        self.queue.clear();
        self.cmdbuf.clear();
        self.buf.clear();
        self.pending_literal = 0;
        self.after_literal = false;
        self.mailbox = None;
        self.state = State::Disconnected;
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let res = self
            .stream
            .write_all(data)
            .and_then(|_| self.stream.flush());
        if let Err(e) = res {
            return Err(self.fatal_error(e.into()));
        }
        Ok(())
    }

    /// Write literal data straight to the wire.
    pub(crate) fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.write_raw(data)
    }

    /// Put raw text ahead of the next queued command. IDLE leaves its `DONE` here.
    pub(crate) fn queue_raw(&mut self, data: &[u8]) {
        self.cmdbuf.extend_from_slice(data);
    }

    pub(crate) fn clear_queued(&mut self) {
        self.cmdbuf.clear();
    }

    /// Read one response line into `buf`, without its CRLF.
    pub(crate) fn read_line(&mut self) -> Result<()> {
        self.buf.clear();
        let limit = self.config.max_line_length;
        let read = (&mut self.stream)
            .take(limit as u64 + 1)
            .read_until(LF, &mut self.buf)?;
        if read == 0 {
            return Err(Error::ConnectionLost);
        }
        if self.buf.last() != Some(&LF) {
            if self.buf.len() > limit {
                log::error!("response line exceeds {} bytes", limit);
                return Err(Error::LineTooLong(limit));
            }
            return Err(Error::ConnectionLost);
        }
        self.buf.pop();
        if self.buf.last() == Some(&CR) {
            self.buf.pop();
        }
        self.last_read = Instant::now();
        log::trace!("< {}", String::from_utf8_lossy(&self.buf));
        self.pending_literal = parse::literal_count(&self.buf).unwrap_or(0);
        Ok(())
    }

    /// Copy the literal announced by the current line into `out`.
    ///
    /// The next [`Session::step`] returns the rest of the line without handling it.
    pub(crate) fn read_literal<W: Write>(&mut self, out: &mut W) -> Result<u64> {
        let expected = std::mem::take(&mut self.pending_literal);
        let copied = io::copy(&mut (&mut self.stream).take(expected), out)?;
        if copied < expected {
            return Err(Error::ConnectionLost);
        }
        log::trace!("< [{} byte literal]", copied);
        self.after_literal = true;
        Ok(copied)
    }

    /// Read a literal and the line that follows it, handing both back. Used where a literal
    /// stands in for a name in the middle of an untagged response.
    pub(crate) fn read_literal_string(&mut self) -> Result<(String, Vec<u8>)> {
        let mut data = Vec::new();
        self.read_literal(&mut data)?;
        let tail = self.read_tail()?;
        Ok((String::from_utf8_lossy(&data).into_owned(), tail))
    }

    /// Read the rest of a line after its literal was consumed.
    pub(crate) fn read_tail(&mut self) -> Result<Vec<u8>> {
        self.read_line()?;
        self.after_literal = false;
        Ok(self.buf.clone())
    }

    /// Wait up to `timeout` for the server to send something.
    ///
    /// Returns `Ok(false)` if nothing arrived in time. Data already buffered counts as ready.
    pub fn poll(&mut self, timeout: Duration) -> Result<bool> {
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.get_mut().set_read_timeout(Some(timeout))?;
        let ready = match self.stream.fill_buf() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(false)
            }
            Err(e) => Err(e),
        };
        self.stream.get_mut().set_read_timeout(None)?;
        ready.map_err(|e| self.fatal_error(e.into()))
    }

    /// Noop always succeeds, and it does nothing. Pending mailbox changes are picked up.
    pub fn noop(&mut self) -> Result<()> {
        self.exec("NOOP", ExecFlags::empty())
    }

    /// Inform the server that the client is done with the connection.
    pub fn logout(&mut self) -> Result<()> {
        if self.state == State::Fatal || self.state == State::Disconnected {
            self.teardown();
            return Ok(());
        }
        self.logging_out = true;
        let res = self.exec("LOGOUT", ExecFlags::POLL);
        self.logging_out = false;
        self.teardown();
        match res {
            Err(Error::ConnectionLost) => Ok(()),
            res => res,
        }
    }

    /// Create a mailbox with the given name.
    pub fn create(&mut self, mailbox_name: &str) -> Result<()> {
        self.exec(&format!("CREATE {}", validate_str(mailbox_name)?), ExecFlags::empty())
    }

    /// The LIST command returns a subset of names from the complete set of all names
    /// available to the client.
    pub fn list(&mut self, reference_name: &str, mailbox_pattern: &str) -> Result<Vec<Name>> {
        self.collect_names("LIST", reference_name, mailbox_pattern)
    }

    /// The LSUB command returns a subset of names from the set of names that the user has
    /// declared as being "active" or "subscribed".
    pub fn lsub(&mut self, reference_name: &str, mailbox_pattern: &str) -> Result<Vec<Name>> {
        self.collect_names("LSUB", reference_name, mailbox_pattern)
    }

    fn collect_names(&mut self, verb: &str, reference: &str, pattern: &str) -> Result<Vec<Name>> {
        let command = format!("{} {} {}", verb, validate_str(reference)?, validate_str(pattern)?);
        self.list_capture = Some(Vec::new());
        let res = self.exec(&command, ExecFlags::empty());
        let names = self.list_capture.take().unwrap_or_default();
        res.map(|_| names)
    }

    /// The server's hierarchy delimiter, asked for once and remembered.
    pub fn delimiter(&mut self) -> Result<Option<char>> {
        if self.delimiter.is_none() {
            self.list("", "")?;
        }
        Ok(self.delimiter)
    }

    /// Select `name`, or examine it when `readonly`, and download its headers.
    pub fn open_mailbox(&mut self, name: &str, readonly: bool) -> Result<&Mailbox> {
        if self.state < State::Authenticated || self.state == State::Fatal {
            return Err(Error::Fatal);
        }
        if self.state == State::Idle {
            self.start(None, ExecFlags::empty())?;
        }
        self.mailbox = None;
        let quoted = validate_str(name)?;
        let mut mailbox = Mailbox::new(name);
        mailbox.readonly = readonly;

        if self.capabilities.contains(Capability::ACL) {
            self.start(Some(&format!("MYRIGHTS {}", quoted)), ExecFlags::QUEUE)?;
        } else {
            mailbox.rights = Rights::all();
        }
        self.mailbox = Some(mailbox);

        let condstore = self.condstore_enabled();
        let command = format!(
            "{} {}{}",
            if readonly { "EXAMINE" } else { "SELECT" },
            quoted,
            if condstore { " (CONDSTORE)" } else { "" }
        );
        self.state = State::Selected;
        if let Err(e) = self.exec(&command, ExecFlags::empty()) {
            log::debug!("could not select {}: {}", name, e);
            if self.state != State::Fatal {
                self.state = State::Authenticated;
            }
            self.mailbox = None;
            return Err(e);
        }

        let count = self.selected()?.new_mail_count;
        self.read_headers(1, count, true)?;

        let mailbox = self.selected_mut()?;
        mailbox.reopen.insert(Reopen::ALLOW);
        mailbox.changes = MailboxChanges::empty();
        let uid_next = mailbox.uid_next;
        self.status_cache.mark_read(name, uid_next);
        log::debug!("selected {} with {} messages", name, count);
        self.selected()
    }

    /// Leave the selected mailbox. Messages marked deleted are removed by the server.
    pub fn close_mailbox(&mut self) -> Result<()> {
        if self.selected().is_err() {
            return Ok(());
        }
        if let Some(mailbox) = self.mailbox.as_mut() {
            mailbox.reopen.remove(Reopen::ALLOW);
        }
        let res = self.exec("CLOSE", ExecFlags::empty());
        if self.state != State::Fatal {
            self.state = State::Authenticated;
        }
        self.mailbox = None;
        res
    }

    pub(crate) fn condstore_enabled(&self) -> bool {
        self.config.use_condstore && self.capabilities.contains(Capability::CONDSTORE)
            || self.qresync
    }

    /// Store locally changed flags on the server. Returns the number of messages stored.
    pub fn sync_flags(&mut self) -> Result<usize> {
        let mailbox = self.selected()?;
        if mailbox.readonly {
            return Ok(0);
        }
        let mark_old = self.config.mark_old;
        let pending: Vec<(Uid, Flags)> = mailbox
            .messages()
            .filter(|m| m.changed)
            .map(|m| (m.uid, m.flags.clone()))
            .collect();

        for (uid, flags) in &pending {
            self.exec(
                &format!("UID STORE {} FLAGS.SILENT ({})", uid, flags.store_list(mark_old)),
                ExecFlags::empty(),
            )?;
            let mailbox = self.selected_mut()?;
            let uid_validity = mailbox.uid_validity;
            let name = mailbox.name.clone();
            let record = match mailbox.by_uid_mut(*uid) {
                Some(message) => {
                    message.server_flags = flags.clone();
                    message.changed = false;
                    super::cache::CachedMessage::from_message(message, uid_validity)
                }
                None => continue,
            };
            if let Some(cache) = self.header_cache.as_mut() {
                record.store(cache.as_mut(), &name)?;
            }
        }
        Ok(pending.len())
    }

    /// Permanently remove messages marked deleted.
    pub fn expunge(&mut self) -> Result<()> {
        let mailbox = self.selected_mut()?;
        if mailbox.readonly {
            return Err(Error::No("mailbox is read-only".to_string()));
        }
        mailbox.reopen.insert(Reopen::EXPUNGE_EXPECTED);
        self.exec("EXPUNGE", ExecFlags::empty())
    }

    /// Run `UID SEARCH` and mark the matching messages. Returns the matching UIDs.
    pub fn search(&mut self, criteria: &str) -> Result<Vec<Uid>> {
        self.selected_mut()?.clear_matched();
        self.exec(&format!("UID SEARCH {}", criteria), ExecFlags::empty())?;
        let mut uids: Vec<Uid> = self
            .selected()?
            .messages()
            .filter(|m| m.matched)
            .map(|m| m.uid)
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock_stream::MockStream;
    use super::*;

    fn session(response: &str) -> Session<MockStream> {
        let mut session = Session::new(MockStream::new(response.as_bytes().to_vec()), Config::default());
        session.state = State::Authenticated;
        session
    }

    fn written(session: &Session<MockStream>) -> String {
        String::from_utf8_lossy(&session.stream.get_ref().written_buf).into_owned()
    }

    #[test]
    fn read_greeting() {
        let greeting = "* OK [CAPABILITY IMAP4rev1 IDLE] Dovecot ready.\r\n";
        let mut session = Session::new(MockStream::new(greeting.as_bytes().to_vec()), Config::default());
        session.read_greeting().unwrap();
        assert_eq!(session.state(), State::Connected);
        assert!(session.capabilities().contains(Capability::IDLE));
        assert!(written(&session).is_empty());
    }

    #[test]
    fn greeting_without_capabilities_asks_for_them() {
        let response = "* OK ready\r\n\
                        * CAPABILITY IMAP4rev1 LOGINDISABLED\r\n\
                        a0000 OK done\r\n";
        let mut session = Session::new(MockStream::new(response.as_bytes().to_vec()), Config::default());
        session.read_greeting().unwrap();
        assert_eq!(written(&session), "a0000 CAPABILITY\r\n");
        assert!(matches!(session.login("u", "p"), Err(Error::No(_))));
    }

    #[test]
    fn bye_greeting() {
        let mock = MockStream::new(b"* BYE go away\r\n".to_vec());
        let mut session = Session::new(mock, Config::default());
        match session.read_greeting() {
            Err(Error::Bye(text)) => assert_eq!(text, "go away"),
            other => panic!("expected BYE, got {:?}", other),
        }
    }

    #[test]
    fn readline_delay_read() {
        let greeting = "* OK Dovecot ready.\r\n";
        let mock = MockStream::default()
            .with_buf(greeting.as_bytes().to_vec())
            .with_delay();
        let mut session = Session::new(mock, Config::default());
        session.read_line().unwrap();
        assert_eq!(session.buf, b"* OK Dovecot ready.");
    }

    #[test]
    fn readline_eof() {
        let mut session = Session::new(MockStream::default().with_eof(), Config::default());
        assert!(matches!(session.read_line(), Err(Error::ConnectionLost)));
    }

    #[test]
    fn read_error_is_fatal() {
        let mut session = Session::new(MockStream::default().with_err(), Config::default());
        session.state = State::Authenticated;
        assert!(matches!(session.noop(), Err(Error::ConnectionLost)));
        assert_eq!(session.state(), State::Fatal);
        assert!(matches!(session.noop(), Err(Error::Fatal)));
    }

    #[test]
    fn overlong_line_is_fatal() {
        let config = Config {
            max_line_length: 16,
            ..Config::default()
        };
        let line = format!("* OK {}\r\n", "x".repeat(40));
        let mut session = Session::new(MockStream::new(line.into_bytes()), config);
        session.state = State::Authenticated;
        assert!(matches!(session.noop(), Err(Error::LineTooLong(16))));
        assert_eq!(session.state(), State::Fatal);
    }

    #[test]
    fn line_exactly_filling_the_limit_is_complete() {
        let config = Config {
            max_line_length: 16,
            ..Config::default()
        };
        // 14 bytes of text plus CRLF
        let mut session = Session::new(MockStream::new(b"* OK 123456789\r\n".to_vec()), config);
        session.read_line().unwrap();
        assert_eq!(session.buf, b"* OK 123456789");
    }

    #[test]
    fn login() {
        let response = "a0000 OK Logged in\r\n\
                        * CAPABILITY IMAP4rev1\r\n\
                        a0001 OK done\r\n";
        let mut session = session(response);
        session.state = State::Connected;
        session.login("username", "password").unwrap();
        assert_eq!(
            written(&session),
            "a0000 LOGIN \"username\" \"password\"\r\na0001 CAPABILITY\r\n"
        );
        assert_eq!(session.state(), State::Authenticated);
    }

    #[test]
    fn login_with_capability_code_skips_refresh() {
        let response = "a0000 OK [CAPABILITY IMAP4rev1 ENABLE QRESYNC] Logged in\r\n\
                        * ENABLED QRESYNC\r\n\
                        a0001 OK enabled\r\n";
        let config = Config {
            use_qresync: true,
            ..Config::default()
        };
        let mut session = Session::new(MockStream::new(response.as_bytes().to_vec()), config);
        session.state = State::Connected;
        session.login("u", "p").unwrap();
        assert_eq!(
            written(&session),
            "a0000 LOGIN \"u\" \"p\"\r\na0001 ENABLE QRESYNC\r\n"
        );
        assert!(session.is_qresync());
    }

    #[test]
    fn authenticate() {
        struct Plain;
        impl Authenticator for Plain {
            type Response = Vec<u8>;
            fn process(&self, challenge: &[u8]) -> Self::Response {
                assert_eq!(challenge, b"ready");
                b"\0user\0pass".to_vec()
            }
        }
        let response = "+ cmVhZHk=\r\n\
                        a0000 OK [CAPABILITY IMAP4rev1] done\r\n";
        let mut session = session(response);
        session.state = State::Connected;
        session.authenticate("PLAIN", &Plain).unwrap();
        assert_eq!(
            written(&session),
            "a0000 AUTHENTICATE PLAIN\r\nAHVzZXIAcGFzcw==\r\n"
        );
        assert_eq!(session.state(), State::Authenticated);
    }

    #[test]
    fn tagged_no_carries_text() {
        let mut session = session("a0000 NO [ALREADYEXISTS] Mailbox exists\r\n");
        match session.create("Archive") {
            Err(Error::No(text)) => assert_eq!(text, "Mailbox exists"),
            other => panic!("expected NO, got {:?}", other),
        }
        assert_eq!(written(&session), "a0000 CREATE \"Archive\"\r\n");
    }

    #[test]
    fn create_rejects_newlines() {
        let mut session = session("");
        assert!(matches!(session.create("a\nb"), Err(Error::Validate(_))));
        assert!(written(&session).is_empty());
    }

    #[test]
    fn queued_commands_go_out_together() {
        let response = "a0001 OK second\r\na0000 OK first\r\n";
        let mut session = session(response);
        session.start(Some("NOOP"), ExecFlags::QUEUE).unwrap();
        assert!(written(&session).is_empty());
        session.start(Some("CHECK"), ExecFlags::empty()).unwrap();
        assert_eq!(written(&session), "a0000 NOOP\r\na0001 CHECK\r\n");

        // the second completion leaves the first outstanding
        assert_eq!(session.step().unwrap(), Status::Continue);
        assert_eq!(session.step().unwrap(), Status::Ok);
    }

    #[test]
    fn oldest_command_failing_last_is_reported() {
        let response = "a0001 OK second\r\na0000 NO first failed\r\n";
        let mut session = session(response);
        session.start(Some("NOOP"), ExecFlags::QUEUE).unwrap();
        session.start(Some("CHECK"), ExecFlags::empty()).unwrap();

        assert_eq!(session.step().unwrap(), Status::Continue);
        let status = session.step().unwrap();
        assert_eq!(status, Status::No);
        assert!(matches!(session.command_error(status), Error::No(ref text) if text == "first failed"));
    }

    #[test]
    fn full_ring_is_drained_first() {
        let config = Config {
            pipeline_depth: 2,
            ..Config::default()
        };
        let response = "a0000 OK\r\na0001 OK\r\na0002 OK\r\n";
        let mut session = Session::new(MockStream::new(response.as_bytes().to_vec()), config);
        session.state = State::Authenticated;
        session.start(Some("NOOP"), ExecFlags::QUEUE).unwrap();
        session.start(Some("NOOP"), ExecFlags::QUEUE).unwrap();
        session.exec("NOOP", ExecFlags::empty()).unwrap();
        assert_eq!(
            written(&session),
            "a0000 NOOP\r\na0001 NOOP\r\na0002 NOOP\r\n"
        );
    }

    #[test]
    fn literal_tail_is_skipped() {
        let response = "* 1 FETCH (BODY[TEXT] {5}\r\nhello)\r\n\
                        a0000 OK done\r\n";
        let mut session = session(response);
        session.start(Some("FETCH 1 BODY[TEXT]"), ExecFlags::empty()).unwrap();
        assert_eq!(session.step().unwrap(), Status::Continue);
        assert_eq!(session.pending_literal, 5);
        // the literal is discarded and its tail line swallowed
        assert_eq!(session.step().unwrap(), Status::Continue);
        assert_eq!(session.buf, b")");
        assert_eq!(session.step().unwrap(), Status::Ok);
    }

    #[test]
    fn poll_sees_buffered_data() {
        let mut session = session("* 3 EXISTS\r\n");
        assert!(session.poll(Duration::from_millis(10)).unwrap());
        let mut session = Session::new(MockStream::default().with_block(), Config::default());
        assert!(!session.poll(Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn poll_timeout_is_distinct() {
        let mut session = Session::new(MockStream::default().with_block(), Config::default());
        session.state = State::Authenticated;
        assert!(matches!(
            session.exec("NOOP", ExecFlags::POLL),
            Err(Error::Timeout)
        ));
        assert_eq!(session.state(), State::Fatal);
    }

    #[test]
    fn logout_ignores_bye() {
        let response = "* BYE Logging out\r\na0000 OK Logout completed.\r\n";
        let mut session = session(response);
        session.logout().unwrap();
        assert_eq!(written(&session), "a0000 LOGOUT\r\n");
        assert_eq!(session.state(), State::Disconnected);
    }

    #[test]
    fn unsolicited_bye_is_fatal() {
        let mut session = session("* BYE shutting down\r\n");
        match session.noop() {
            Err(Error::Bye(text)) => assert_eq!(text, "shutting down"),
            other => panic!("expected BYE, got {:?}", other),
        }
        assert_eq!(session.state(), State::Fatal);
    }

    #[test]
    fn list_names() {
        let response = "* LIST (\\HasNoChildren) \"/\" INBOX\r\n\
                        * LIST (\\Noselect \\HasChildren) \"/\" \"Public Folders\"\r\n\
                        * LIST () \"/\" {7}\r\nArchive\r\n\
                        a0000 OK done\r\n";
        let mut session = session(response);
        let names = session.list("", "*").unwrap();
        assert_eq!(written(&session), "a0000 LIST \"\" \"*\"\r\n");
        assert_eq!(names.len(), 3);
        assert_eq!(names[0].name(), "INBOX");
        assert_eq!(names[0].delimiter(), Some('/'));
        assert_eq!(names[1].name(), "Public Folders");
        assert!(names[1].is_noselect());
        assert_eq!(names[2].name(), "Archive");
    }

    #[test]
    fn delimiter_is_remembered() {
        let response = "* LIST (\\Noselect) \".\" \"\"\r\na0000 OK done\r\n";
        let mut session = session(response);
        assert_eq!(session.delimiter().unwrap(), Some('.'));
        assert_eq!(session.delimiter().unwrap(), Some('.'));
        assert_eq!(written(&session), "a0000 LIST \"\" \"\"\r\n");
    }
}
