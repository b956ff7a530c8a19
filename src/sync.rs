//! Header synchronization.
//!
//! Brings the message index of the selected mailbox up to date, reusing the header cache
//! where it can and fetching header fields for everything else.

use std::cmp;
use std::fs::File;
use std::io::{Read, Write};

use super::cache::{self, CachedMessage, KEY_MODSEQ, KEY_UIDNEXT, KEY_UIDSEQSET, KEY_UIDVALIDITY};
use super::client::Session;
use super::command::{ExecFlags, Status};
use super::conn::SetReadTimeout;
use super::error::{Error, Result};
use super::index::{Message, Reopen};
use super::seqset::{msn_fetch_set, SeqsetIter};
use super::types::*;
use super::untagged::FetchResponse;

/// Outcome of one pass over the requested range.
enum Pass {
    Done,
    /// The pass threw its results away and has to run again.
    Restart,
}

/// How the cached state was brought up to date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CacheSync {
    /// Nothing usable was cached.
    None,
    /// Cached handles were matched against the server's UIDs.
    Uids,
    /// The cached sequence was replayed and only changes were fetched.
    Qresync,
}

impl<T: Read + Write + SetReadTimeout> Session<T> {
    /// Download headers for the messages `begin..=end` that have no handle yet.
    ///
    /// A range starting at 1 on an empty index counts as the initial download and may be
    /// served from the header cache.
    pub fn refresh_headers(&mut self, begin: Seq, end: Seq) -> Result<()> {
        let initial = begin <= 1 && self.selected()?.max_msn() == 0;
        self.read_headers(cmp::max(begin, 1), end, initial)?;
        let mailbox = self.selected_mut()?;
        mailbox.reopen.insert(Reopen::ALLOW);
        Ok(())
    }

    pub(crate) fn read_headers(&mut self, begin: Seq, end: Seq, initial: bool) -> Result<()> {
        let mut qresync = self.qresync;
        loop {
            match self.read_headers_pass(begin, end, initial, qresync)? {
                Pass::Done => return Ok(()),
                Pass::Restart => {
                    log::debug!("restarting header download for {}:{}", begin, end);
                    qresync = false;
                }
            }
        }
    }

    /// One pass over `begin..=end`. `qresync` says whether this pass may replay the cached
    /// sequence; the session keeps QRESYNC enabled either way.
    fn read_headers_pass(&mut self, begin: Seq, end: Seq, initial: bool, qresync: bool) -> Result<Pass> {
        {
            let mailbox = self.selected_mut()?;
            // no deferred work while headers stream in
            mailbox.reopen.remove(Reopen::ALLOW | Reopen::NEWMAIL_PENDING);
            mailbox.new_mail_count = 0;
            mailbox.msn.reserve(end);
        }

        let synced = if initial && self.header_cache.is_some() {
            self.sync_from_cache(end, qresync)?
        } else {
            CacheSync::None
        };

        let mut first = begin;
        {
            let mailbox = self.selected()?;
            while first <= end && mailbox.msn.get(first).is_some() {
                first += 1;
            }
        }
        let max_uid = self.fetch_new_headers(first, end, initial)?;

        if synced == CacheSync::Qresync {
            let mailbox = self.selected_mut()?;
            if !mailbox.is_consistent() || mailbox.max_msn() > cmp::max(end, mailbox.new_mail_count) {
                self.frontend.error("QRESYNC failed.  Reopening mailbox.");
                let mailbox = self.selected_mut()?;
                mailbox.reset_messages();
                mailbox.replaying = false;
                let name = mailbox.name.clone();
                if let Some(hc) = self.header_cache.as_mut() {
                    hc.delete(&name, KEY_MODSEQ)?;
                    hc.delete(&name, KEY_UIDSEQSET)?;
                }
                return Ok(Pass::Restart);
            }
        }

        self.finish_headers(max_uid, initial, qresync)?;
        Ok(Pass::Done)
    }

    /// Populate the index from the header cache and catch up with the server.
    fn sync_from_cache(&mut self, end: Seq, qresync: bool) -> Result<CacheSync> {
        let (name, uid_validity, server_modseq) = {
            let mailbox = self.selected()?;
            (mailbox.name.clone(), mailbox.uid_validity, mailbox.modseq)
        };
        let (cached_validity, cached_uid_next, cached_modseq, seqset) = match self.header_cache.as_mut() {
            Some(hc) => (
                cache::get_u32(hc.as_mut(), &name, KEY_UIDVALIDITY)?,
                cache::get_u32(hc.as_mut(), &name, KEY_UIDNEXT)?,
                cache::get_u64(hc.as_mut(), &name, KEY_MODSEQ)?.unwrap_or(0),
                hc.get(&name, KEY_UIDSEQSET)?,
            ),
            None => return Ok(CacheSync::None),
        };
        if uid_validity == 0 || cached_validity != Some(uid_validity) {
            log::debug!("header cache for {} is from another UIDVALIDITY epoch", name);
            return Ok(CacheSync::None);
        }
        let uid_next = match cached_uid_next.filter(|&n| n > 0) {
            Some(uid_next) => uid_next,
            None => {
                log::debug!("header cache for {} has no UIDNEXT", name);
                return Ok(CacheSync::None);
            }
        };
        let last_uid = uid_next - 1;

        if qresync && cached_modseq > 0 {
            if let Some(seqset) = seqset {
                log::debug!("replaying cached sequence of {}", name);
                self.replay_uid_seqset(&String::from_utf8_lossy(&seqset), &name, uid_validity)?;
                self.selected_mut()?.replaying = true;
                if last_uid > 0 {
                    let command = format!(
                        "UID FETCH 1:{} (FLAGS) (CHANGEDSINCE {} VANISHED)",
                        last_uid, cached_modseq
                    );
                    self.fetch_changes(&command)?;
                }
                return Ok(CacheSync::Qresync);
            }
        }

        if last_uid == 0 || end == 0 {
            return Ok(CacheSync::Uids);
        }
        if self.condstore_enabled() && server_modseq > 0 && cached_modseq > 0 {
            self.eval_cache(&format!("UID FETCH 1:{} (UID)", last_uid), end)?;
            self.fetch_changes(&format!(
                "UID FETCH 1:{} (FLAGS) (CHANGEDSINCE {})",
                last_uid, cached_modseq
            ))?;
        } else {
            self.eval_cache(&format!("UID FETCH 1:{} (UID FLAGS)", last_uid), end)?;
        }
        Ok(CacheSync::Uids)
    }

    /// Give cached handles the positions they had when the sequence was stored.
    fn replay_uid_seqset(&mut self, seqset: &str, name: &str, uid_validity: u32) -> Result<()> {
        let mut msn: Seq = 0;
        for entry in SeqsetIter::new(seqset) {
            let uid = match entry {
                Ok(uid) => uid,
                Err(part) => {
                    log::debug!("unreadable cached sequence at {}", part);
                    break;
                }
            };
            msn += 1;
            if uid == 0 {
                continue;
            }
            let record = match self.header_cache.as_mut() {
                Some(hc) => CachedMessage::load(hc.as_mut(), name, uid, uid_validity)?,
                None => None,
            };
            if let Some(record) = record {
                self.selected_mut()?.insert(msn, record.into_message());
            }
        }
        Ok(())
    }

    /// Match the server's UIDs against cached records. With FLAGS in the request, the cached
    /// flags are refreshed too.
    fn eval_cache(&mut self, command: &str, end: Seq) -> Result<()> {
        self.fetch_loop(command, |session, response| {
            let known = session.selected()?.msn.get(response.msn).is_some();
            match response.items.uid {
                Some(uid) if !known => session.adopt_cached(response.msn, uid, response.items.flags, end),
                // a flag change for a message we already placed
                _ => {
                    session.update_message(response.msn, &response.items);
                    Ok(())
                }
            }
        })
    }

    fn adopt_cached(&mut self, msn: Seq, uid: Uid, flags: Option<Vec<String>>, end: Seq) -> Result<()> {
        let mark_old = self.config.mark_old;
        let (name, uid_validity) = {
            let mailbox = self.selected()?;
            if msn == 0 || msn > end {
                log::debug!("skipping FETCH response for unknown message number {}", msn);
                return Ok(());
            }
            if mailbox.msn.get(msn).is_some() || mailbox.by_uid(uid).is_some() {
                log::debug!("skipping duplicate FETCH response for UID {}", uid);
                return Ok(());
            }
            (mailbox.name.clone(), mailbox.uid_validity)
        };
        let hc = match self.header_cache.as_mut() {
            Some(hc) => hc,
            None => return Ok(()),
        };
        let mut record = match CachedMessage::load(hc.as_mut(), &name, uid, uid_validity)? {
            Some(record) => record,
            None => return Ok(()),
        };
        if let Some(tokens) = flags {
            let server = Flags::from_tokens(tokens.iter().map(String::as_str), mark_old);
            if server != record.flags {
                record.flags = server;
                record.store(hc.as_mut(), &name)?;
            }
        }
        self.selected_mut()?.insert(msn, record.into_message());
        Ok(())
    }

    /// Apply a CHANGEDSINCE flag update, then compact away anything that vanished.
    fn fetch_changes(&mut self, command: &str) -> Result<()> {
        self.fetch_loop(command, |session, response| session.apply_changed(response))?;
        let mailbox = self.selected_mut()?;
        if mailbox.reopen.contains(Reopen::EXPUNGE_PENDING) {
            self.expunge_mailbox()?;
            self.selected_mut()?.reopen.remove(Reopen::EXPUNGE_PENDING);
        }
        Ok(())
    }

    fn apply_changed(&mut self, response: FetchResponse) -> Result<()> {
        let mark_old = self.config.mark_old;
        let mailbox = self.selected_mut()?;
        let uid_validity = mailbox.uid_validity;
        let name = mailbox.name.clone();
        let key = match response.items.uid {
            Some(uid) => mailbox.key_by_uid(uid),
            None => mailbox.msn.get(response.msn),
        };
        let message = match key.and_then(|key| mailbox.get_mut(key)) {
            Some(message) => message,
            None => {
                log::debug!("flag update for unknown message {}", response.msn);
                return Ok(());
            }
        };
        if let Some(tokens) = &response.items.flags {
            let server = Flags::from_tokens(tokens.iter().map(String::as_str), mark_old);
            message.flags = server.clone();
            message.server_flags = server;
            message.changed = false;
        }
        if let Some(modseq) = response.items.modseq {
            message.modseq = modseq;
        }
        let record = CachedMessage::from_message(message, uid_validity);
        if let Some(hc) = self.header_cache.as_mut() {
            record.store(hc.as_mut(), &name)?;
        }
        Ok(())
    }

    /// Fetch headers for every empty slot in `begin..=end`, in chunks. Returns the highest
    /// UID seen.
    fn fetch_new_headers(&mut self, begin: Seq, end: Seq, initial: bool) -> Result<Uid> {
        let use_index = initial && self.header_cache.is_some();
        let imap4_only = self.capabilities.contains(Capability::IMAP4)
            && !self.capabilities.contains(Capability::IMAP4REV1);
        let header_item = if imap4_only {
            "RFC822.HEADER".to_string()
        } else {
            format!("BODY.PEEK[HEADER.FIELDS ({})]", self.config.header_fields())
        };
        let max_per_fetch = self.config.max_headers_per_fetch;

        let mut max_uid: Uid = 0;
        let mut end = end;
        let mut msn = begin;
        while msn <= end {
            self.check_interrupt()?;
            let (set, chunk_end, count) = {
                let mailbox = self.selected()?;
                msn_fetch_set(&mailbox.msn, use_index, msn, end, max_per_fetch)
            };
            if count > 0 {
                log::debug!("fetching headers {} of {}", set, end);
                let command = format!(
                    "FETCH {} (UID FLAGS INTERNALDATE RFC822.SIZE {})",
                    set, header_item
                );
                let limit = end;
                self.fetch_loop(&command, |session, response| {
                    session.store_header(response, limit, &mut max_uid)
                })?;
            }
            msn = chunk_end + 1;

            // new mail announced while we were busy
            let mailbox = self.selected_mut()?;
            if mailbox.reopen.contains(Reopen::NEWMAIL_PENDING) && mailbox.new_mail_count > end {
                end = mailbox.new_mail_count;
                mailbox.msn.reserve(end);
                mailbox.reopen.remove(Reopen::NEWMAIL_PENDING);
                log::debug!("extending header download to {}", end);
            }
            if count == 0 && chunk_end >= end {
                break;
            }
        }
        Ok(max_uid)
    }

    fn store_header(&mut self, response: FetchResponse, end: Seq, max_uid: &mut Uid) -> Result<()> {
        let FetchResponse {
            msn, items, header, ..
        } = response;
        let mark_old = self.config.mark_old;
        let mailbox = self.selected_mut()?;
        if mailbox.msn.get(msn).is_some() {
            if header.is_some() {
                log::debug!("skipping FETCH response for already known message {}", msn);
            } else {
                self.update_message(msn, &items);
            }
            return Ok(());
        }
        if msn == 0 || msn > cmp::max(end, mailbox.new_mail_count) {
            log::debug!("skipping FETCH response for unknown message number {}", msn);
            return Ok(());
        }
        let uid = match items.uid {
            Some(uid) => uid,
            None => {
                log::debug!("FETCH response for {} carries no UID", msn);
                return Ok(());
            }
        };
        if mailbox.by_uid(uid).is_some() {
            log::debug!("skipping FETCH response for duplicate UID {}", uid);
            return Ok(());
        }

        let flags = Flags::from_tokens(items.flags.iter().flatten().map(String::as_str), mark_old);
        let mut message = Message::new(uid, flags);
        if let Some(header) = header {
            message.envelope = read_envelope(header)?;
        }
        message.internal_date = items.internal_date;
        message.size = items.size.unwrap_or(0);
        message.modseq = items.modseq.unwrap_or(0);

        let record = CachedMessage::from_message(&message, mailbox.uid_validity);
        let name = mailbox.name.clone();
        mailbox.insert(msn, message);
        *max_uid = cmp::max(*max_uid, uid);
        if let Some(hc) = self.header_cache.as_mut() {
            record.store(hc.as_mut(), &name)?;
        }
        self.check_interrupt()
    }

    /// Persist the mailbox scalars and let deferred work run again.
    fn finish_headers(&mut self, max_uid: Uid, initial: bool, qresync: bool) -> Result<()> {
        let condstore = self.condstore_enabled();
        let mailbox = self.selected_mut()?;
        if max_uid > 0 && max_uid >= mailbox.uid_next {
            mailbox.uid_next = max_uid + 1;
        }
        let name = mailbox.name.clone();
        let uid_validity = mailbox.uid_validity;
        let uid_next = mailbox.uid_next;
        let modseq = mailbox.modseq;
        let seqset = if initial && qresync {
            Some(mailbox.uid_seqset())
        } else {
            None
        };

        if let Some(hc) = self.header_cache.as_mut() {
            cache::put_u32(hc.as_mut(), &name, KEY_UIDVALIDITY, uid_validity)?;
            if uid_next > 0 {
                cache::put_u32(hc.as_mut(), &name, KEY_UIDNEXT, uid_next)?;
            }
            if initial {
                if condstore && modseq > 0 {
                    cache::put_u64(hc.as_mut(), &name, KEY_MODSEQ, modseq)?;
                } else {
                    hc.delete(&name, KEY_MODSEQ)?;
                }
                match seqset {
                    Some(seqset) => hc.put(&name, KEY_UIDSEQSET, seqset.as_bytes())?,
                    None => hc.delete(&name, KEY_UIDSEQSET)?,
                }
            }
        }

        let mailbox = self.selected_mut()?;
        mailbox.replaying = false;
        if mailbox.new_mail_count <= mailbox.max_msn() {
            mailbox.reopen.remove(Reopen::NEWMAIL_PENDING);
        }
        mailbox.reopen.insert(Reopen::ALLOW);
        Ok(())
    }

    /// Run a command whose FETCH responses go to `handle` instead of the generic handler.
    pub(crate) fn fetch_loop<F>(&mut self, command: &str, mut handle: F) -> Result<()>
    where
        F: FnMut(&mut Self, FetchResponse) -> Result<()>,
    {
        let outer = self.fetch_capture.replace(Vec::new());
        let res = self.run_fetch(command, &mut handle);
        self.fetch_capture = outer;
        res
    }

    fn run_fetch<F>(&mut self, command: &str, handle: &mut F) -> Result<()>
    where
        F: FnMut(&mut Self, FetchResponse) -> Result<()>,
    {
        self.start(Some(command), ExecFlags::empty())?;
        loop {
            let status = self.step()?;
            let captured = self.fetch_capture.replace(Vec::new()).unwrap_or_default();
            for response in captured {
                handle(self, response)?;
            }
            match status {
                Status::Continue | Status::Respond => continue,
                Status::Ok => return Ok(()),
                status => return Err(self.command_error(status)),
            }
        }
    }

    /// Honour a pending interrupt from the frontend.
    pub(crate) fn check_interrupt(&mut self) -> Result<()> {
        if !self.frontend.interrupted() {
            return Ok(());
        }
        if self.frontend.confirm("Abort download and close the connection?", true) {
            log::debug!("download aborted by user");
            self.teardown();
            return Err(Error::Aborted);
        }
        self.frontend.clear_interrupt();
        Ok(())
    }
}

fn read_envelope(mut spool: File) -> Result<Envelope> {
    let mut raw = Vec::new();
    spool.read_to_end(&mut raw)?;
    Ok(Envelope::parse(&raw))
}
