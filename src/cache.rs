//! Local copies of what the server holds: header records and message bodies.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::index::Message;
use crate::types::{Envelope, Flags, ModSeq, Uid};

pub(crate) const KEY_UIDVALIDITY: &str = "/UIDVALIDITY";
pub(crate) const KEY_UIDNEXT: &str = "/UIDNEXT";
pub(crate) const KEY_MODSEQ: &str = "/MODSEQ";
pub(crate) const KEY_UIDSEQSET: &str = "/UIDSEQSET";

/// Key of the record for one message.
pub(crate) fn uid_key(uid: Uid) -> String {
    format!("/{}", uid)
}

/// A persistent key/value store for header data, one namespace per mailbox.
///
/// Values are opaque bytes. The engine stores little-endian scalars under the well-known
/// `/UIDVALIDITY`, `/UIDNEXT` and `/MODSEQ` keys, the UID sequence set under `/UIDSEQSET`,
/// and one record per message under `/<uid>`.
pub trait HeaderCache {
    fn get(&mut self, mailbox: &str, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&mut self, mailbox: &str, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&mut self, mailbox: &str, key: &str) -> Result<()>;
}

/// A [`HeaderCache`] that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryHeaderCache {
    entries: HashMap<String, HashMap<String, Vec<u8>>>,
}

impl MemoryHeaderCache {
    pub fn new() -> Self {
        MemoryHeaderCache::default()
    }

    /// Number of keys stored for `mailbox`.
    pub fn len(&self, mailbox: &str) -> usize {
        self.entries.get(mailbox).map(HashMap::len).unwrap_or(0)
    }
}

impl HeaderCache for MemoryHeaderCache {
    fn get(&mut self, mailbox: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(mailbox).and_then(|m| m.get(key)).cloned())
    }

    fn put(&mut self, mailbox: &str, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .entry(mailbox.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, mailbox: &str, key: &str) -> Result<()> {
        if let Some(m) = self.entries.get_mut(mailbox) {
            m.remove(key);
        }
        Ok(())
    }
}

pub(crate) fn get_u32(cache: &mut dyn HeaderCache, mailbox: &str, key: &str) -> Result<Option<u32>> {
    Ok(cache
        .get(mailbox, key)?
        .and_then(|v| <[u8; 4]>::try_from(v.as_slice()).ok())
        .map(u32::from_le_bytes))
}

pub(crate) fn get_u64(cache: &mut dyn HeaderCache, mailbox: &str, key: &str) -> Result<Option<u64>> {
    Ok(cache
        .get(mailbox, key)?
        .and_then(|v| <[u8; 8]>::try_from(v.as_slice()).ok())
        .map(u64::from_le_bytes))
}

pub(crate) fn put_u32(cache: &mut dyn HeaderCache, mailbox: &str, key: &str, value: u32) -> Result<()> {
    cache.put(mailbox, key, &value.to_le_bytes())
}

pub(crate) fn put_u64(cache: &mut dyn HeaderCache, mailbox: &str, key: &str, value: u64) -> Result<()> {
    cache.put(mailbox, key, &value.to_le_bytes())
}

/// What the header cache keeps per message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CachedMessage {
    pub uid_validity: u32,
    pub uid: Uid,
    pub flags: Flags,
    pub envelope: Envelope,
    /// Seconds since the epoch and the UTC offset in seconds.
    pub internal_date: Option<(i64, i32)>,
    pub size: u32,
    pub modseq: ModSeq,
}

impl CachedMessage {
    pub(crate) fn from_message(message: &Message, uid_validity: u32) -> Self {
        CachedMessage {
            uid_validity,
            uid: message.uid,
            flags: message.server_flags.clone(),
            envelope: message.envelope.clone(),
            internal_date: message
                .internal_date
                .map(|d| (d.timestamp(), d.offset().local_minus_utc())),
            size: message.size,
            modseq: message.modseq,
        }
    }

    pub(crate) fn into_message(self) -> Message {
        let mut message = Message::new(self.uid, self.flags);
        message.envelope = self.envelope;
        message.internal_date = self.internal_date.and_then(|(ts, offset)| {
            FixedOffset::east_opt(offset)
                .and_then(|tz| tz.timestamp_opt(ts, 0).single())
        });
        message.size = self.size;
        message.modseq = self.modseq;
        message
    }

    /// Load the record for `uid`, ignoring records from an earlier UIDVALIDITY epoch.
    pub(crate) fn load(
        cache: &mut dyn HeaderCache,
        mailbox: &str,
        uid: Uid,
        uid_validity: u32,
    ) -> Result<Option<CachedMessage>> {
        let raw = match cache.get(mailbox, &uid_key(uid))? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match bincode::deserialize::<CachedMessage>(&raw) {
            Ok(record) if record.uid_validity == uid_validity && record.uid == uid => {
                Ok(Some(record))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                log::debug!("dropping unreadable cache record for UID {}: {}", uid, e);
                Ok(None)
            }
        }
    }

    pub(crate) fn store(&self, cache: &mut dyn HeaderCache, mailbox: &str) -> Result<()> {
        let raw = bincode::serialize(self)?;
        cache.put(mailbox, &uid_key(self.uid), &raw)
    }
}

/// Full message bodies on disk, one file per `{uidvalidity}-{uid}`.
#[derive(Debug, Clone)]
pub struct BodyCache {
    dir: PathBuf,
}

impl BodyCache {
    /// Use `dir` for body files, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(BodyCache { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, mailbox: &str, uid_validity: u32, uid: Uid) -> PathBuf {
        self.dir
            .join(mailbox_dir(mailbox))
            .join(format!("{}-{}", uid_validity, uid))
    }

    /// Open the cached body, if there is one.
    pub(crate) fn open(&self, mailbox: &str, uid_validity: u32, uid: Uid) -> Result<Option<File>> {
        match File::open(self.path(mailbox, uid_validity, uid)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A temporary file in the cache directory, ready to be committed.
    pub(crate) fn spool(&self) -> Result<NamedTempFile> {
        Ok(NamedTempFile::new_in(&self.dir)?)
    }

    /// Move a downloaded body into place.
    pub(crate) fn commit(
        &self,
        file: NamedTempFile,
        mailbox: &str,
        uid_validity: u32,
        uid: Uid,
    ) -> Result<File> {
        let path = self.path(mailbox, uid_validity, uid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(file.persist(path)?)
    }

    pub(crate) fn delete(&self, mailbox: &str, uid_validity: u32, uid: Uid) -> Result<()> {
        match fs::remove_file(self.path(mailbox, uid_validity, uid)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// A single path component for `mailbox`. Anything but ASCII letters, digits, `-` and `_`
/// is percent-encoded, and so is a leading dot.
fn mailbox_dir(mailbox: &str) -> String {
    if mailbox.is_empty() {
        return "%".to_string();
    }
    let mut dir = String::with_capacity(mailbox.len());
    for (i, byte) in mailbox.bytes().enumerate() {
        match byte {
            b'.' if i > 0 => dir.push('.'),
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => dir.push(byte as char),
            _ => dir.push_str(&format!("%{:02X}", byte)),
        }
    }
    dir
}
