//! Handling of untagged server data.
//!
//! Every `*` line, and every tagged OK that carries a response code, passes through
//! [`Session::handle_untagged`] before the command ring sees it.

use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::str;

use super::client::{Session, State};
use super::conn::SetReadTimeout;
use super::error::{Error, Result};
use super::index::MailboxChanges;
use super::parse::{self, FetchItems, ItemsEnd};
use super::seqset::SeqsetIter;
use super::types::*;

/// One FETCH response captured for the command that asked for it.
#[derive(Debug)]
pub(crate) struct FetchResponse {
    pub msn: Seq,
    pub items: FetchItems,
    /// Header data delivered as a literal, spooled and rewound.
    pub header: Option<File>,
    /// A body literal was written to the session's spool.
    pub spooled: bool,
}

/// What kind of untagged data a line carries.
#[derive(Debug, PartialEq, Eq)]
enum Untagged<'a> {
    Exists(Seq),
    Expunge(Seq),
    Fetch,
    Recent,
    /// Message data arrived while no mailbox is selected.
    Unselected,
    /// OK or PREAUTH, possibly with a response code.
    Ok,
    No,
    Bad,
    Bye,
    Capability(&'a [u8]),
    Flags(&'a [u8]),
    List(&'a [u8]),
    Lsub(&'a [u8]),
    MyRights(&'a [u8]),
    Search(&'a [u8]),
    Status(&'a [u8]),
    Enabled(&'a [u8]),
    Vanished(&'a [u8]),
    Unknown,
}

/// Sort a response line into its kind. Message data only counts while a mailbox is selected.
fn classify(line: &[u8], selected: bool) -> Untagged<'_> {
    if let Ok((_, (n, kind))) = parse::numeric_response(line) {
        if !selected {
            return Untagged::Unselected;
        }
        return match kind.to_ascii_uppercase().as_str() {
            "EXISTS" => Untagged::Exists(n),
            "EXPUNGE" => Untagged::Expunge(n),
            "FETCH" => Untagged::Fetch,
            "RECENT" => Untagged::Recent,
            _ => Untagged::Unknown,
        };
    }

    let body = parse::next_word(line);
    let word = parse::words(body).next().unwrap_or("").to_ascii_uppercase();
    let rest = parse::next_word(body);
    match word.as_str() {
        "OK" | "PREAUTH" => Untagged::Ok,
        "NO" => Untagged::No,
        "BAD" => Untagged::Bad,
        "BYE" => Untagged::Bye,
        "CAPABILITY" => Untagged::Capability(rest),
        "FLAGS" => Untagged::Flags(rest),
        "LIST" => Untagged::List(rest),
        "LSUB" => Untagged::Lsub(rest),
        "MYRIGHTS" => Untagged::MyRights(rest),
        "SEARCH" => Untagged::Search(rest),
        "STATUS" => Untagged::Status(rest),
        "ENABLED" => Untagged::Enabled(rest),
        "VANISHED" => Untagged::Vanished(rest),
        _ => Untagged::Unknown,
    }
}

impl<T: Read + Write + SetReadTimeout> Session<T> {
    pub(crate) fn handle_untagged(&mut self) -> Result<()> {
        let line = self.buf.clone();
        let selected = matches!(self.state, State::Selected | State::Idle);

        match classify(&line, selected) {
            Untagged::Exists(n) => self.handle_exists(n),
            Untagged::Expunge(n) => self.handle_expunge(n),
            Untagged::Fetch => self.handle_fetch(&line)?,
            Untagged::Recent => {}
            Untagged::Unselected => {
                log::debug!("ignoring {} outside a selected mailbox", String::from_utf8_lossy(&line));
            }
            Untagged::Ok => self.handle_code(&line),
            Untagged::No => {
                let text = parse::response_text(&line);
                log::warn!("server: {}", text);
                if self.config.show_server_warnings {
                    self.frontend.message(&text);
                }
            }
            Untagged::Bad => log::warn!("server: {}", parse::response_text(&line)),
            Untagged::Bye => {
                let text = parse::response_text(&line);
                if self.logging_out {
                    log::debug!("server closed the connection: {}", text);
                } else {
                    self.frontend.error(&text);
                    return Err(Error::Bye(text));
                }
            }
            Untagged::Capability(rest) => self.set_capabilities(rest),
            Untagged::Flags(rest) => {
                if let (Ok((_, flags)), Some(mailbox)) =
                    (parse::flag_list(rest), self.mailbox.as_mut())
                {
                    mailbox.flags = flags.into_iter().map(str::to_string).collect();
                }
            }
            Untagged::List(rest) => self.handle_list(rest, false)?,
            Untagged::Lsub(rest) => self.handle_list(rest, true)?,
            Untagged::MyRights(rest) => self.handle_myrights(rest),
            Untagged::Search(rest) => self.handle_search(rest),
            Untagged::Status(rest) => self.handle_status(rest)?,
            Untagged::Enabled(rest) => {
                for ext in parse::words(rest) {
                    match ext.to_ascii_uppercase().as_str() {
                        "UTF8=ACCEPT" | "UTF8=ONLY" => self.unicode = true,
                        "QRESYNC" => self.qresync = true,
                        _ => {}
                    }
                }
            }
            Untagged::Vanished(rest) => self.handle_vanished(rest),
            Untagged::Unknown => {
                log::debug!("unhandled response: {}", String::from_utf8_lossy(&line))
            }
        }
        Ok(())
    }

    fn set_capabilities(&mut self, words: &[u8]) {
        self.capabilities = Capabilities::parse(parse::words(words));
        self.capability_updates += 1;
    }

    /// Response codes of OK and PREAUTH lines, tagged or not.
    fn handle_code(&mut self, line: &[u8]) {
        let code = match parse::response_code(line) {
            Some(code) => code,
            None => return,
        };
        let (name, arg) = match code.find(' ') {
            Some(i) => (&code[..i], code[i + 1..].trim()),
            None => (code, ""),
        };
        let name = name.to_ascii_uppercase();
        if name == "CAPABILITY" {
            self.set_capabilities(arg.as_bytes());
            return;
        }
        if name == "ALERT" {
            let text = parse::response_text(line);
            self.frontend.message(&text);
            return;
        }

        let selected = matches!(self.state, State::Selected | State::Idle);
        let mailbox = match self.mailbox.as_mut() {
            Some(mailbox) if selected => mailbox,
            _ => return,
        };
        match name.as_str() {
            "UIDVALIDITY" => match arg.parse() {
                Ok(n) => mailbox.uid_validity = n,
                Err(_) => log::debug!("bad UIDVALIDITY {}", arg),
            },
            "UIDNEXT" => match arg.parse() {
                Ok(n) => mailbox.uid_next = n,
                Err(_) => log::debug!("bad UIDNEXT {}", arg),
            },
            "HIGHESTMODSEQ" => match arg.parse() {
                Ok(n) => mailbox.modseq = n,
                Err(_) => log::debug!("bad HIGHESTMODSEQ {}", arg),
            },
            "NOMODSEQ" => mailbox.modseq = 0,
            "PERMANENTFLAGS" => {
                if let Ok((_, flags)) = parse::flag_list(arg.as_bytes()) {
                    mailbox.permanent_flags = flags.into_iter().map(str::to_string).collect();
                }
            }
            "READ-ONLY" => mailbox.readonly = true,
            "READ-WRITE" => {}
            _ => log::trace!("ignoring response code {}", name),
        }
    }

    fn handle_exists(&mut self, count: Seq) {
        let mailbox = match self.mailbox.as_mut() {
            Some(mailbox) => mailbox,
            None => return,
        };
        let known = mailbox.max_msn();
        if count < known {
            // an EXPUNGE should have told us
            log::debug!("message count fell from {} to {}", known, count);
        } else if count == known {
            log::trace!("EXISTS without new mail");
        } else {
            log::debug!("new mail: {} messages", count);
            mailbox.new_mail_count = count;
            mailbox.reopen |= super::index::Reopen::NEWMAIL_PENDING;
        }
    }

    fn handle_expunge(&mut self, msn: Seq) {
        if let Some(mailbox) = self.mailbox.as_mut() {
            if mailbox.expunge_msn(msn) && mailbox.new_mail_count > 0 {
                mailbox.new_mail_count -= 1;
            }
        }
    }

    /// `VANISHED [(EARLIER)] <uid-set>`
    fn handle_vanished(&mut self, rest: &[u8]) {
        let rest = String::from_utf8_lossy(rest);
        let (earlier, set) = match rest.get(..9) {
            Some(prefix) if prefix.eq_ignore_ascii_case("(EARLIER)") => (true, rest[9..].trim()),
            _ => (false, rest.trim()),
        };
        let renumber_earlier = self.config.vanished_earlier_renumbers;
        let selected = matches!(self.state, State::Selected | State::Idle);
        let mailbox = match self.mailbox.as_mut() {
            Some(mailbox) if selected => mailbox,
            _ => return,
        };
        let renumber = !earlier || mailbox.replaying || renumber_earlier;
        for uid in SeqsetIter::new(set) {
            match uid {
                Ok(uid) => {
                    mailbox.vanish_uid(uid, renumber);
                }
                Err(part) => {
                    log::debug!("malformed VANISHED set at {}", part);
                    break;
                }
            }
        }
    }

    fn handle_fetch(&mut self, line: &[u8]) -> Result<()> {
        let (msn, rest) = match parse::fetch_start(line) {
            Some(start) => start,
            None => {
                log::debug!("malformed FETCH response");
                return Ok(());
            }
        };
        let mut response = FetchResponse {
            msn,
            items: FetchItems::default(),
            header: None,
            spooled: false,
        };
        let mut end = response.items.parse(rest);
        while let ItemsEnd::Literal { ref name, .. } = end {
            if self.pending_literal == 0 {
                break;
            }
            if name.starts_with("BODY[") || name.starts_with("RFC822") {
                if let Some(mut spool) = self.body_spool.take() {
                    let res = self.read_literal(&mut spool);
                    self.body_spool = Some(spool);
                    res?;
                    response.spooled = true;
                } else if self.fetch_capture.is_some() {
                    let mut spool = tempfile::tempfile()?;
                    self.read_literal(&mut spool)?;
                    spool.rewind()?;
                    response.header = Some(spool);
                } else {
                    self.read_literal(&mut io::sink())?;
                }
            } else {
                self.read_literal(&mut io::sink())?;
            }
            let tail = self.read_tail()?;
            end = response.items.parse(&tail);
        }
        if end == ItemsEnd::Truncated {
            log::debug!("FETCH response for {} ended early", msn);
        }

        if let Some(capture) = self.fetch_capture.as_mut() {
            capture.push(response);
            return Ok(());
        }
        self.update_message(msn, &response.items);
        Ok(())
    }

    /// Fold unsolicited FETCH data into the message at `msn`.
    pub(crate) fn update_message(&mut self, msn: Seq, items: &FetchItems) {
        let mark_old = self.config.mark_old;
        let mailbox = match self.mailbox.as_mut() {
            Some(mailbox) => mailbox,
            None => return,
        };
        let key = match mailbox.msn.get(msn) {
            Some(key) => key,
            None => {
                log::debug!("skipping FETCH response for unknown message number {}", msn);
                return;
            }
        };
        let message = match mailbox.get_mut(key) {
            Some(message) => message,
            None => return,
        };
        if let Some(uid) = items.uid {
            if uid != message.uid {
                log::debug!("FETCH UID {} does not match message {} (UID {})", uid, msn, message.uid);
                return;
            }
        }
        if let Some(modseq) = items.modseq {
            message.modseq = modseq;
        }
        let tokens = match &items.flags {
            Some(tokens) => tokens,
            None => return,
        };

        let server = Flags::from_tokens(tokens.iter().map(String::as_str), mark_old);
        let local = message.changed;
        let known = message.server_flags.clone();
        let changed = message.flags.reconcile(&known, &server, local);
        message.server_flags = server;
        if !local {
            message.changed = false;
        }
        if changed {
            mailbox.changes |= if local {
                MailboxChanges::RESYNC
            } else {
                MailboxChanges::FLAGS
            };
        }
    }

    /// A mailbox name that may arrive as a literal. Returns the name and what follows it.
    fn astring_name(&mut self, rest: &[u8]) -> Result<Option<(String, Vec<u8>)>> {
        if self.pending_literal > 0 && rest.first() == Some(&b'{') {
            return self.read_literal_string().map(Some);
        }
        Ok(parse::mailbox_name(rest)
            .ok()
            .map(|(tail, name)| (name, tail.to_vec())))
    }

    /// `LIST (attributes) "delimiter" name`
    fn handle_list(&mut self, rest: &[u8], lsub: bool) -> Result<()> {
        let (after, attributes) = match parse::flag_list(rest) {
            Ok(r) => r,
            Err(_) => {
                log::debug!("malformed LIST response");
                return Ok(());
            }
        };
        let (after, delimiter) = match parse::delimiter(parse::trim_start(after)) {
            Ok(r) => r,
            Err(_) => {
                log::debug!("malformed LIST delimiter");
                return Ok(());
            }
        };
        let attributes: Vec<NameAttribute> =
            attributes.into_iter().map(NameAttribute::from).collect();
        let name = match self.astring_name(parse::trim_start(after))? {
            Some((name, _)) => name,
            None => {
                log::debug!("LIST response without a name");
                return Ok(());
            }
        };

        if name.is_empty() {
            self.delimiter = delimiter;
            log::debug!("hierarchy delimiter is {:?}", delimiter);
        }
        let name = Name::new(attributes, delimiter, name);
        if lsub && self.config.check_subscribed && !name.is_noselect() && !name.name().is_empty() {
            self.status_cache.track(name.name());
        }
        if let Some(names) = self.list_capture.as_mut() {
            names.push(name);
        }
        Ok(())
    }

    /// `MYRIGHTS name rights`
    fn handle_myrights(&mut self, rest: &[u8]) {
        let (tail, name) = match parse::mailbox_name(rest) {
            Ok(r) => r,
            Err(_) => return,
        };
        let rights = String::from_utf8_lossy(parse::trim_start(tail)).trim().to_string();
        match self.mailbox.as_mut() {
            Some(mailbox) if mailbox.name == name => mailbox.rights = Rights::parse(&rights),
            _ => log::debug!("MYRIGHTS for unselected mailbox {}", name),
        }
    }

    /// `SEARCH` results are UIDs, since only UID SEARCH is issued.
    fn handle_search(&mut self, rest: &[u8]) {
        let mailbox = match self.mailbox.as_mut() {
            Some(mailbox) => mailbox,
            None => return,
        };
        for word in parse::words(rest) {
            match word.parse::<Uid>() {
                Ok(uid) => {
                    if let Some(message) = mailbox.by_uid_mut(uid) {
                        message.matched = true;
                    }
                }
                Err(_) => log::debug!("bad SEARCH result {}", word),
            }
        }
    }

    /// `STATUS name (MESSAGES n RECENT n ...)`
    fn handle_status(&mut self, rest: &[u8]) -> Result<()> {
        let (name, tail) = match self.astring_name(rest)? {
            Some(r) => r,
            None => {
                log::debug!("malformed STATUS response");
                return Ok(());
            }
        };
        let tail = String::from_utf8_lossy(&tail);
        let items = tail
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')');

        let mut status = MailboxStatus {
            name,
            ..MailboxStatus::default()
        };
        let mut words = items.split_whitespace();
        while let (Some(item), Some(value)) = (words.next(), words.next()) {
            let value: u32 = match value.parse() {
                Ok(v) => v,
                Err(_) => {
                    log::debug!("bad STATUS value {} for {}", value, item);
                    return Ok(());
                }
            };
            match item.to_ascii_uppercase().as_str() {
                "MESSAGES" => status.messages = value,
                "RECENT" => status.recent = value,
                "UNSEEN" => status.unseen = value,
                "UIDNEXT" => status.uid_next = value,
                "UIDVALIDITY" => status.uid_validity = value,
                _ => {}
            }
        }

        if let Some(statuses) = self.status_capture.as_mut() {
            statuses.push(status);
            return Ok(());
        }
        let check_recent = self.config.mail_check_recent;
        match self.status_cache.update(&status, check_recent) {
            Some(entry) if entry.has_new => log::debug!("new mail in {}", entry.name),
            Some(_) => {}
            None => log::debug!("STATUS for untracked mailbox {}", status.name),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::config::Config;
    use super::super::index::{tests::message, Mailbox, Reopen};
    use super::super::mock_stream::MockStream;
    use super::*;

    fn selected(response: &str, uids: &[Uid]) -> Session<MockStream> {
        let mut session = Session::new(MockStream::new(response.as_bytes().to_vec()), Config::default());
        let mut mailbox = Mailbox::new("INBOX");
        for (i, &uid) in uids.iter().enumerate() {
            mailbox.insert(i as Seq + 1, message(uid));
        }
        mailbox.reopen = Reopen::ALLOW;
        session.mailbox = Some(mailbox);
        session.state = State::Selected;
        session
    }

    fn feed(session: &mut Session<MockStream>, line: &str) {
        session.buf = line.as_bytes().to_vec();
        session.pending_literal = parse::literal_count(&session.buf).unwrap_or(0);
        session.handle_untagged().unwrap();
    }

    #[test]
    fn classification() {
        assert_eq!(classify(b"* 3 EXISTS", true), Untagged::Exists(3));
        assert_eq!(classify(b"* 3 EXISTS", false), Untagged::Unselected);
        assert_eq!(classify(b"* 12 fetch (FLAGS ())", true), Untagged::Fetch);
        assert_eq!(classify(b"a0001 OK [READ-ONLY] done", false), Untagged::Ok);
        assert_eq!(classify(b"* lsub () \"/\" INBOX", false), Untagged::Lsub(b"() \"/\" INBOX"));
        assert_eq!(classify(b"* VANISHED (EARLIER) 3:5", true), Untagged::Vanished(b"(EARLIER) 3:5"));
        assert_eq!(classify(b"* XYZZY", true), Untagged::Unknown);
    }

    #[test]
    fn exists_grows_and_shrink_is_ignored() {
        let mut session = selected("", &[1, 2, 3]);
        feed(&mut session, "* 2 EXISTS");
        let mailbox = session.mailbox().unwrap();
        assert_eq!(mailbox.new_mail_count, 0);
        assert!(!mailbox.reopen.contains(Reopen::NEWMAIL_PENDING));

        feed(&mut session, "* 5 EXISTS");
        let mailbox = session.mailbox().unwrap();
        assert_eq!(mailbox.new_mail_count, 5);
        assert!(mailbox.reopen.contains(Reopen::NEWMAIL_PENDING));
    }

    #[test]
    fn expunge_shifts_numbers() {
        let mut session = selected("", &[10, 11, 12]);
        feed(&mut session, "* 2 EXPUNGE");
        let mailbox = session.mailbox().unwrap();
        assert_eq!(mailbox.max_msn(), 2);
        assert_eq!(mailbox.by_msn(2).unwrap().uid(), 12);
        assert!(mailbox.by_uid(11).is_none());
        assert!(mailbox.reopen.contains(Reopen::EXPUNGE_PENDING));
    }

    #[test]
    fn vanished_keeps_numbers_for_earlier() {
        let mut session = selected("", &[10, 11, 12, 13]);
        feed(&mut session, "* VANISHED (EARLIER) 11");
        let mailbox = session.mailbox().unwrap();
        assert_eq!(mailbox.max_msn(), 4);
        assert!(mailbox.by_msn(2).is_none());
        assert_eq!(mailbox.by_msn(3).unwrap().uid(), 12);

        feed(&mut session, "* VANISHED 12:13");
        let mailbox = session.mailbox().unwrap();
        assert_eq!(mailbox.max_msn(), 2);
        assert_eq!(mailbox.by_msn(1).unwrap().uid(), 10);
    }

    #[test]
    fn vanished_earlier_renumbers_when_configured() {
        let mut session = selected("", &[10, 11, 12]);
        session.config.vanished_earlier_renumbers = true;
        feed(&mut session, "* VANISHED (EARLIER) 10,99");
        let mailbox = session.mailbox().unwrap();
        assert_eq!(mailbox.max_msn(), 2);
        assert_eq!(mailbox.by_msn(1).unwrap().uid(), 11);
    }

    #[test]
    fn fetch_flags_apply_without_local_edits() {
        let mut session = selected("", &[10, 11]);
        feed(&mut session, "* 2 FETCH (UID 11 MODSEQ (77) FLAGS (\\Seen \\Flagged))");
        let mailbox = session.mailbox().unwrap();
        let message = mailbox.by_uid(11).unwrap();
        assert!(message.flags().seen && message.flags().flagged);
        assert!(!message.is_changed());
        assert_eq!(message.modseq, 77);
        assert!(mailbox.changes.contains(MailboxChanges::FLAGS));
    }

    #[test]
    fn fetch_keeps_local_edits() {
        let mut session = selected("", &[10]);
        {
            let message = session.mailbox_mut().unwrap().by_uid_mut(10).unwrap();
            let mut flags = message.flags().clone();
            flags.flagged = true;
            message.set_flags(flags);
        }
        feed(&mut session, "* 1 FETCH (FLAGS (\\Seen))");
        let mailbox = session.mailbox().unwrap();
        let message = mailbox.by_uid(10).unwrap();
        assert!(message.flags().flagged);
        assert!(!message.flags().seen);
        assert!(message.is_changed());
        assert!(mailbox.changes.contains(MailboxChanges::RESYNC));
    }

    #[test]
    fn fetch_with_mismatched_uid_is_dropped() {
        let mut session = selected("", &[10]);
        feed(&mut session, "* 1 FETCH (UID 99 FLAGS (\\Seen))");
        assert!(!session.mailbox().unwrap().by_uid(10).unwrap().flags().seen);
        feed(&mut session, "* 7 FETCH (FLAGS (\\Seen))");
        assert!(session.mailbox().unwrap().changes.is_empty());
    }

    #[test]
    fn fetch_literal_is_consumed() {
        let mut session = selected("hello FLAGS (\\Deleted))\r\n", &[10]);
        feed(&mut session, "* 1 FETCH (BODY[TEXT] {5}");
        assert_eq!(session.pending_literal, 0);
        assert!(session.mailbox().unwrap().by_uid(10).unwrap().flags().deleted);
    }

    #[test]
    fn selection_codes() {
        let mut session = selected("", &[]);
        feed(&mut session, "* OK [UIDVALIDITY 3857529045] UIDs valid");
        feed(&mut session, "* OK [UIDNEXT 4392] Predicted next UID");
        feed(&mut session, "* OK [HIGHESTMODSEQ 715194045007] Highest");
        feed(&mut session, "* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited");
        feed(&mut session, "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)");
        feed(&mut session, "a0003 OK [READ-ONLY] EXAMINE completed");
        let mailbox = session.mailbox().unwrap();
        assert_eq!(mailbox.uid_validity(), 3857529045);
        assert_eq!(mailbox.uid_next(), 4392);
        assert_eq!(mailbox.highest_modseq(), 715194045007);
        assert_eq!(mailbox.permanent_flags.len(), 3);
        assert_eq!(mailbox.flags.len(), 5);
        assert!(mailbox.is_readonly());
    }

    #[test]
    fn search_marks_matches() {
        let mut session = selected("", &[4, 5, 6]);
        feed(&mut session, "* SEARCH 4 6 100");
        let mailbox = session.mailbox().unwrap();
        assert!(mailbox.by_uid(4).unwrap().is_matched());
        assert!(!mailbox.by_uid(5).unwrap().is_matched());
        assert!(mailbox.by_uid(6).unwrap().is_matched());
    }

    #[test]
    fn status_updates_tracked_mailboxes() {
        let mut session = selected("", &[]);
        session.status_cache_mut().track("Lists");
        feed(&mut session, "* STATUS Lists (MESSAGES 12 RECENT 2 UIDNEXT 40 UIDVALIDITY 9 UNSEEN 3)");
        let status = session.status_cache().get("Lists").unwrap();
        assert_eq!(status.messages, 12);
        assert_eq!(status.unseen, 3);
        assert!(status.has_new);
        // untracked mailboxes are only logged
        feed(&mut session, "* STATUS Other (MESSAGES 1)");
        assert!(session.status_cache().get("Other").is_none());
    }

    #[test]
    fn status_with_literal_name() {
        let mut session = selected("Lists (MESSAGES 4 UNSEEN 0)\r\n", &[]);
        session.status_cache_mut().track("Lists");
        feed(&mut session, "* STATUS {5}");
        assert_eq!(session.status_cache().get("Lists").unwrap().messages, 4);
    }

    #[test]
    fn lsub_tracks_subscribed_mailboxes() {
        let mut session = selected("", &[]);
        session.config.check_subscribed = true;
        feed(&mut session, "* LSUB () \"/\" Lists/rust");
        feed(&mut session, "* LSUB (\\Noselect) \"/\" Lists");
        assert!(session.status_cache().is_tracked("Lists/rust"));
        assert!(!session.status_cache().is_tracked("Lists"));
    }

    #[test]
    fn myrights_applies_to_selected() {
        let mut session = selected("", &[]);
        feed(&mut session, "* MYRIGHTS INBOX lrs");
        let rights = session.mailbox().unwrap().rights();
        assert!(rights.contains(Rights::LOOKUP | Rights::READ | Rights::SEEN));
        assert!(!rights.contains(Rights::INSERT));
    }

    #[test]
    fn enabled_extensions() {
        let mut session = selected("", &[]);
        feed(&mut session, "* ENABLED QRESYNC UTF8=ACCEPT");
        assert!(session.is_qresync());
        assert!(session.is_unicode());
    }

    #[test]
    fn untagged_no_reaches_frontend() {
        struct Recorder(std::rc::Rc<std::cell::RefCell<Vec<String>>>);
        impl crate::frontend::Frontend for Recorder {
            fn message(&mut self, text: &str) {
                self.0.borrow_mut().push(text.to_string());
            }
        }
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut session = selected("", &[]).with_frontend(Box::new(Recorder(seen.clone())));
        feed(&mut session, "* NO Disk quota nearly exceeded");
        feed(&mut session, "* OK [ALERT] System shutdown in 10 minutes");
        assert_eq!(
            *seen.borrow(),
            vec!["Disk quota nearly exceeded", "System shutdown in 10 minutes"]
        );
    }
}
