//! A pipelined IMAP client engine.
//!
//! The engine speaks IMAP4rev1 with the CONDSTORE, QRESYNC, ENABLE and IDLE extensions. It keeps
//! an index of the selected mailbox that follows the server's message sequence numbers through
//! expunges and new mail, and reconciles it with a local header cache so that reopening a
//! mailbox only asks the server for what changed.
//!
//! Everything goes through a [`Session`]. It owns the transport, runs commands through a small
//! pipeline of tagged requests, and reports to the user through a [`Frontend`].
//!
//! # Usage
//!
//! ```no_run
//! use std::net::TcpStream;
//!
//! use imap_engine::{Config, MemoryHeaderCache, Session};
//!
//! fn main() -> imap_engine::Result<()> {
//!     let stream = TcpStream::connect(("imap.example.org", 143))?;
//!     let mut session = Session::connect(stream, Config::default())?
//!         .with_header_cache(Box::new(MemoryHeaderCache::new()));
//!
//!     session.login("username", "password")?;
//!
//!     let mailbox = session.open_mailbox("INBOX", false)?;
//!     println!("{} messages", mailbox.max_msn());
//!     for message in mailbox.messages() {
//!         println!("{}: {:?}", message.uid(), message.envelope().subject);
//!     }
//!
//!     let changes = session.check_mailbox(true)?;
//!     println!("changes since opening: {:?}", changes);
//!
//!     session.logout()
//! }
//! ```
//!
//! TLS streams from `native-tls` work the same way once the handshake is done; the engine
//! only needs `Read + Write +` [`SetReadTimeout`].

#![warn(rust_2018_idioms)]

#[macro_use]
mod utils;

mod cache;
mod command;
mod config;
mod conn;
mod frontend;
mod index;
mod message;
mod parse;
mod seqset;
mod sync;
mod types;
mod untagged;

pub mod authenticator;
pub mod client;
pub mod error;
pub mod extensions;

pub use crate::authenticator::Authenticator;
pub use crate::cache::{BodyCache, HeaderCache, MemoryHeaderCache};
pub use crate::client::{Session, State};
pub use crate::command::{ExecFlags, Status};
pub use crate::config::Config;
pub use crate::conn::{Connection, ImapConnection, SetReadTimeout};
pub use crate::error::{Error, Result};
pub use crate::frontend::{Frontend, Silent};
pub use crate::index::{Mailbox, MailboxChanges, Message, MessageKey};
pub use crate::message::CopyOutcome;
pub use crate::types::*;

#[cfg(any(test, feature = "test_helpers"))]
pub mod testing;

#[cfg(test)]
mod mock_stream;
