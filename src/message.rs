//! Per-message operations: downloading bodies, uploading with APPEND and server-side COPY.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use chrono::{DateTime, FixedOffset, Local};
use tempfile::NamedTempFile;

use super::client::Session;
use super::command::{ExecFlags, Status};
use super::conn::SetReadTimeout;
use super::error::{Error, Result};
use super::parse;
use super::seqset::{SeqsetBuilder, MAX_SEQSET_LEN};
use super::types::*;
use super::utils::validate_str;

/// Result of a [`Session::copy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The server copied this many messages.
    Copied(usize),
    /// Some messages carry local edits the server cannot reproduce. Nothing was copied; the
    /// caller has to download and append them instead.
    NeedsFallback,
}

/// Turn bare LF line endings into CRLF and, when `dot_stuffing` is set, double a leading dot
/// on every line.
fn normalize_message(content: &[u8], dot_stuffing: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + content.len() / 32);
    let mut line_start = true;
    let mut prev = 0u8;
    for &c in content {
        if line_start && dot_stuffing && c == b'.' {
            out.push(b'.');
        }
        if c == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(c);
        line_start = c == b'\n';
        prev = c;
    }
    out
}

impl<T: Read + Write + SetReadTimeout> Session<T> {
    /// Download a message, or only its header, into a file positioned at the start.
    ///
    /// Full bodies are served from and saved to the body cache when one is configured.
    pub fn fetch_body(&mut self, uid: Uid, headers_only: bool) -> Result<File> {
        let (name, uid_validity) = {
            let mailbox = self.selected()?;
            if mailbox.by_uid(uid).is_none() {
                return Err(Error::NoSuchMessage(uid));
            }
            (mailbox.name.clone(), mailbox.uid_validity)
        };

        if !headers_only {
            if let Some(bodies) = self.body_cache.as_ref() {
                if let Some(file) = bodies.open(&name, uid_validity, uid)? {
                    log::debug!("UID {} served from the body cache", uid);
                    return Ok(file);
                }
            }
        }

        let section = if headers_only {
            "BODY.PEEK[HEADER]"
        } else if self.config.peek {
            "BODY.PEEK[]"
        } else {
            "BODY[]"
        };
        let spool = match self.body_cache.as_ref() {
            Some(bodies) if !headers_only => bodies.spool()?,
            _ => NamedTempFile::new()?,
        };
        self.body_spool = Some(spool);

        let mark_old = self.config.mark_old;
        let mut fetched = false;
        let res = self.fetch_loop(&format!("UID FETCH {} {}", uid, section), |session, response| {
            if !response.spooled {
                session.update_message(response.msn, &response.items);
                return Ok(());
            }
            fetched = true;
            if response.items.uid.map_or(false, |u| u != uid) {
                session
                    .frontend
                    .error("The message index is incorrect. Try reopening the mailbox.");
            }
            if let Some(tokens) = &response.items.flags {
                let server = Flags::from_tokens(tokens.iter().map(String::as_str), mark_old);
                if let Some(message) = session.selected_mut()?.by_uid_mut(uid) {
                    if !message.changed {
                        message.flags = server.clone();
                        message.server_flags = server;
                    }
                }
            }
            Ok(())
        });
        let spool = self.body_spool.take();
        res?;
        let spool = match spool {
            Some(spool) if fetched => spool,
            _ => return Err(Error::NoSuchMessage(uid)),
        };

        let mut file = match self.body_cache.as_ref() {
            Some(bodies) if !headers_only => bodies.commit(spool, &name, uid_validity, uid)?,
            _ => spool.into_file(),
        };
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    /// Upload a message to `mailbox`.
    ///
    /// Line endings are normalized to CRLF before the length is announced. `date` defaults to
    /// now.
    pub fn append(
        &mut self,
        mailbox: &str,
        flags: &Flags,
        date: Option<DateTime<FixedOffset>>,
        content: &[u8],
    ) -> Result<()> {
        let data = normalize_message(content, self.config.append_dot_stuffing);
        let date = date.unwrap_or_else(|| Local::now().into());
        let command = format!(
            "APPEND {} ({}) \"{}\" {{{}}}",
            validate_str(mailbox)?,
            flags.append_list(),
            date.format("%d-%b-%Y %H:%M:%S %z"),
            data.len()
        );
        self.start(Some(&command), ExecFlags::empty())?;
        loop {
            match self.step()? {
                Status::Continue => continue,
                Status::Respond => break,
                Status::Ok => {
                    log::warn!("APPEND completed before the message was sent");
                    return Err(Error::Append);
                }
                status => return Err(self.command_error(status)),
            }
        }

        log::trace!("> [{} byte message]", data.len());
        self.write_data(&data)?;
        self.write_data(b"\r\n")?;
        loop {
            match self.step()? {
                Status::Continue | Status::Respond => continue,
                Status::Ok => return Ok(()),
                status => return Err(self.command_error(status)),
            }
        }
    }

    /// Copy messages to `dest` on the server, creating it after a `[TRYCREATE]` reply if the
    /// user agrees. With `delete_after`, the originals are marked deleted.
    pub fn copy(&mut self, uids: &[Uid], dest: &str, delete_after: bool) -> Result<CopyOutcome> {
        {
            let mailbox = self.selected()?;
            for &uid in uids {
                match mailbox.by_uid(uid) {
                    Some(message) if message.attach_del => {
                        log::debug!("UID {} has local attachment edits; not copying on the server", uid);
                        return Ok(CopyOutcome::NeedsFallback);
                    }
                    Some(_) => {}
                    None => return Err(Error::NoSuchMessage(uid)),
                }
            }
        }
        if uids.is_empty() {
            return Ok(CopyOutcome::Copied(0));
        }

        // the copies should carry the flags the user sees
        let changed = self
            .selected()?
            .messages()
            .any(|m| m.changed && uids.contains(&m.uid));
        if changed {
            self.sync_flags()?;
        }

        let mut sorted = uids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut builder = SeqsetBuilder::with_limit(MAX_SEQSET_LEN);
        for &uid in &sorted {
            builder.push(uid);
        }
        let sets = builder.finish();
        let quoted = validate_str(dest)?;

        for set in &sets {
            let command = format!("UID COPY {} {}", set, quoted);
            let mut retried = false;
            loop {
                match self.exec(&command, ExecFlags::FAIL_OK) {
                    Ok(()) => break,
                    Err(Error::No(text)) => {
                        let trycreate = parse::response_code(&self.last_tagged)
                            .map_or(false, |code| code.eq_ignore_ascii_case("TRYCREATE"));
                        if !trycreate || retried {
                            self.frontend.error(&text);
                            return Err(Error::No(text));
                        }
                        let prompt = format!("Create {}?", dest);
                        if self.config.confirm_create && !self.frontend.confirm(&prompt, true) {
                            return Err(Error::No(text));
                        }
                        self.create(dest)?;
                        retried = true;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if delete_after {
            let mailbox = self.selected_mut()?;
            for uid in &sorted {
                if let Some(message) = mailbox.by_uid_mut(*uid) {
                    let mut flags = message.flags.clone();
                    flags.deleted = true;
                    message.set_flags(flags);
                }
            }
        }
        log::debug!("copied {} messages to {}", sorted.len(), dest);
        Ok(CopyOutcome::Copied(sorted.len()))
    }

    /// [`Session::copy`] every tagged message.
    pub fn copy_tagged(&mut self, dest: &str, delete_after: bool) -> Result<CopyOutcome> {
        let uids: Vec<Uid> = self
            .selected()?
            .messages()
            .filter(|m| m.tagged)
            .map(|m| m.uid)
            .collect();
        self.copy(&uids, dest, delete_after)
    }
}
