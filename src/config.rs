//! Engine options.
//!
//! The engine never reads configuration files itself. Front ends deserialize a [`Config`] from
//! whatever format they use (every field has a default) or build one in code.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Header fields requested for every message during header synchronization.
pub(crate) const HEADER_FIELDS: &str = "DATE FROM SENDER SUBJECT TO CC MESSAGE-ID REFERENCES \
                                        CONTENT-TYPE CONTENT-DESCRIPTION IN-REPLY-TO REPLY-TO \
                                        LINES LIST-POST X-LABEL X-ORIGINAL-TO";

/// Options that shape how a [`Session`](crate::Session) talks to the server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of commands in flight before the engine drains responses.
    pub pipeline_depth: usize,
    /// Upper bound on the number of messages requested by one header FETCH. Zero means no
    /// limit.
    pub max_headers_per_fetch: u32,
    /// How long to wait for the server when a bounded wait is requested.
    #[serde(with = "seconds")]
    pub poll_timeout: Duration,
    /// How often an idle connection is refreshed with IDLE or NOOP.
    #[serde(with = "seconds")]
    pub keepalive: Duration,
    /// Sanity limit on the length of a single response line.
    pub max_line_length: usize,
    /// Extra header fields fetched along with the standard set.
    pub extra_headers: Vec<String>,
    /// Directory of the message body cache. No body caching when unset.
    pub body_cache_dir: Option<PathBuf>,

    /// Display untagged NO responses to the user.
    pub show_server_warnings: bool,
    /// Ask before creating a missing COPY destination.
    pub confirm_create: bool,
    /// Use RECENT to detect new mail the first time a mailbox is checked.
    pub mail_check_recent: bool,
    /// Track mailboxes reported by LSUB for new-mail checks.
    pub check_subscribed: bool,
    /// Use CONDSTORE when the server supports it.
    pub use_condstore: bool,
    /// Enable QRESYNC when the server supports it.
    pub use_qresync: bool,
    /// Use IDLE for mailbox checks when the server supports it.
    pub use_idle: bool,
    /// Fetch message bodies without setting `\Seen`.
    pub peek: bool,
    /// Honour the `Old` keyword.
    pub mark_old: bool,
    /// Account for and escape leading dots when uploading messages.
    pub append_dot_stuffing: bool,
    /// Renumber MSNs for `VANISHED (EARLIER)` the same way as for live removals. Some servers
    /// send EARLIER for messages that are still counted in the current sequence space.
    pub vanished_earlier_renumbers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pipeline_depth: 15,
            max_headers_per_fetch: 0,
            poll_timeout: Duration::from_secs(30),
            keepalive: Duration::from_secs(300),
            max_line_length: 10 * 1024 * 1024,
            extra_headers: Vec::new(),
            body_cache_dir: None,
            show_server_warnings: true,
            confirm_create: true,
            mail_check_recent: true,
            check_subscribed: false,
            use_condstore: false,
            use_qresync: false,
            use_idle: true,
            peek: true,
            mark_old: true,
            append_dot_stuffing: true,
            vanished_earlier_renumbers: false,
        }
    }
}

impl Config {
    pub(crate) fn header_fields(&self) -> String {
        let mut fields = String::from(HEADER_FIELDS);
        for extra in &self.extra_headers {
            fields.push(' ');
            fields.push_str(&extra.to_ascii_uppercase());
        }
        fields
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_headers_are_appended() {
        let config = Config {
            extra_headers: vec!["x-mailer".to_string()],
            ..Config::default()
        };
        let fields = config.header_fields();
        assert!(fields.starts_with("DATE FROM"));
        assert!(fields.ends_with(" X-ORIGINAL-TO X-MAILER"));
    }
}
