//! Enable the test_helpers feature to expose a scripted transport for testing code that drives
//! an [`imap_engine::Session`](crate::Session).
//!
//! To use add a dev-dependency on the crate with the feature "test_helpers", e.g.
//!
//! ```toml
//! [dependencies]
//! imap-engine = { version = "0.1" }
//!
//! [dev-dependencies]
//! # mirror the same configuration your dependencies and add test_helpers
//! imap-engine = { version = "0.1", features = ["test_helpers"] }
//! ```
//!
//! A [`ScriptedStream`] plays back canned server output and records everything the session
//! writes. Output queued with [`ScriptedStream::reply`] only becomes readable once the client
//! wrote something, which is how a server answering commands looks from the client side.
//! Keep a [`Transcript`] handle around to look at the client side after the stream was moved
//! into the session.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{HeaderCache, MemoryHeaderCache};
use crate::conn::SetReadTimeout;
use crate::error::Result;

/// A transport that replays a fixed server script.
///
/// Once the script is exhausted, reads fail like a closed connection, or like a quiet one when
/// the stream was made [`blocking`](ScriptedStream::blocking).
#[derive(Debug)]
pub struct ScriptedStream {
    script: Cursor<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    written: Transcript,
    quiet_when_done: bool,
}

impl ScriptedStream {
    /// A stream that answers with `script`, verbatim.
    ///
    /// ```
    /// let stream = imap_engine::testing::ScriptedStream::new("* OK ready\r\n");
    /// let session = imap_engine::Session::connect(stream, imap_engine::Config::default());
    /// ```
    pub fn new(script: impl Into<Vec<u8>>) -> Self {
        ScriptedStream {
            script: Cursor::new(script.into()),
            replies: VecDeque::new(),
            written: Transcript::default(),
            quiet_when_done: false,
        }
    }

    /// Queue output that is released by the next write after the earlier replies went out.
    pub fn reply(mut self, output: impl Into<Vec<u8>>) -> Self {
        self.replies.push_back(output.into());
        self
    }

    /// Time out instead of failing once the script runs out.
    pub fn blocking(mut self) -> Self {
        self.quiet_when_done = true;
        self
    }

    /// A handle on everything written to this stream.
    pub fn transcript(&self) -> Transcript {
        self.written.clone()
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.script.read(buf)?;
        if read == 0 && !buf.is_empty() {
            let kind = if self.quiet_when_done {
                io::ErrorKind::WouldBlock
            } else {
                io::ErrorKind::UnexpectedEof
            };
            return Err(io::Error::new(kind, "end of script"));
        }
        Ok(read)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.written.append(buf);
        if let Some(reply) = self.replies.pop_front() {
            self.script.get_mut().extend_from_slice(&reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SetReadTimeout for ScriptedStream {
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

/// The client's side of a scripted conversation.
#[derive(Clone, Debug, Default)]
pub struct Transcript(Arc<Mutex<Vec<u8>>>);

impl Transcript {
    fn append(&self, data: &[u8]) {
        if let Ok(mut written) = self.0.lock() {
            written.extend_from_slice(data);
        }
    }

    /// Everything written so far, lossily decoded.
    pub fn text(&self) -> String {
        self.0
            .lock()
            .map(|written| String::from_utf8_lossy(&written).into_owned())
            .unwrap_or_default()
    }

    /// The written lines without their CRLF.
    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }
}

/// A [`MemoryHeaderCache`] that can be handed to a session and still be inspected, or handed
/// to the next session to test reuse of cached headers.
#[derive(Clone, Debug, Default)]
pub struct SharedHeaderCache(Arc<Mutex<MemoryHeaderCache>>);

impl SharedHeaderCache {
    pub fn new() -> Self {
        SharedHeaderCache::default()
    }

    /// The raw value stored for `key`.
    pub fn value(&self, mailbox: &str, key: &str) -> Option<Vec<u8>> {
        self.0
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(mailbox, key).ok().flatten())
    }

    /// A little-endian `u32` stored for `key`, such as `/UIDNEXT`.
    pub fn u32_value(&self, mailbox: &str, key: &str) -> Option<u32> {
        self.value(mailbox, key)
            .and_then(|v| <[u8; 4]>::try_from(v.as_slice()).ok())
            .map(u32::from_le_bytes)
    }

    /// Number of keys stored for `mailbox`.
    pub fn len(&self, mailbox: &str) -> usize {
        self.0.lock().map(|cache| cache.len(mailbox)).unwrap_or(0)
    }
}

impl HeaderCache for SharedHeaderCache {
    fn get(&mut self, mailbox: &str, key: &str) -> Result<Option<Vec<u8>>> {
        match self.0.lock() {
            Ok(mut cache) => cache.get(mailbox, key),
            Err(_) => Ok(None),
        }
    }

    fn put(&mut self, mailbox: &str, key: &str, value: &[u8]) -> Result<()> {
        match self.0.lock() {
            Ok(mut cache) => cache.put(mailbox, key, value),
            Err(_) => Ok(()),
        }
    }

    fn delete(&mut self, mailbox: &str, key: &str) -> Result<()> {
        match self.0.lock() {
            Ok(mut cache) => cache.delete(mailbox, key),
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_then_eof() {
        let mut stream = ScriptedStream::new("* OK\r\n");
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 6);
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut quiet = ScriptedStream::new("").blocking();
        assert_eq!(quiet.read(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn replies_wait_for_a_write() {
        let mut stream = ScriptedStream::new("* OK\r\n").reply("a0000 OK\r\n").blocking();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 6);
        assert_eq!(stream.read(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);
        stream.write_all(b"a0000 NOOP\r\n").unwrap();
        assert_eq!(stream.read(&mut buf).unwrap(), 10);
        assert_eq!(&buf[..10], b"a0000 OK\r\n");
    }

    #[test]
    fn transcript_follows_the_stream() {
        let mut stream = ScriptedStream::new("");
        let transcript = stream.transcript();
        stream.write_all(b"a0000 NOOP\r\na0001 LOGOUT\r\n").unwrap();
        assert_eq!(transcript.lines(), vec!["a0000 NOOP", "a0001 LOGOUT"]);
    }

    #[test]
    fn shared_cache_is_shared() {
        let cache = SharedHeaderCache::new();
        let mut handle = cache.clone();
        handle.put("INBOX", "/UIDNEXT", &7u32.to_le_bytes()).unwrap();
        assert_eq!(cache.u32_value("INBOX", "/UIDNEXT"), Some(7));
        assert_eq!(cache.len("INBOX"), 1);
        handle.delete("INBOX", "/UIDNEXT").unwrap();
        assert!(cache.value("INBOX", "/UIDNEXT").is_none());
    }
}
