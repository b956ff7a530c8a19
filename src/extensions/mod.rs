//! Implementations of IMAP extensions and of the checks built on them.
pub mod idle;
pub mod status;
