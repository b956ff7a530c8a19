//! IMAP engine errors.

use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::result;
use std::str::Utf8Error;

use bufstream::IntoInnerError as BufError;

/// A convenience wrapper around `Result` for `imap_engine::Error`.
pub type Result<T> = result::Result<T, Error>;

/// A set of errors that can occur while driving an IMAP session.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An `io::Error` that occurred while trying to read or write to a network stream.
    Io(IoError),
    /// A BAD response from the IMAP server.
    Bad(String),
    /// A NO response from the IMAP server.
    No(String),
    /// The server said goodbye without being asked to.
    Bye(String),
    /// The connection was terminated unexpectedly.
    ConnectionLost,
    /// The session hit an unrecoverable error earlier and can no longer be used.
    Fatal,
    /// The server did not answer within the configured poll timeout.
    Timeout,
    /// A response line grew past the configured sanity limit.
    LineTooLong(usize),
    /// The user interrupted a long-running operation and confirmed the abort.
    Aborted,
    /// Error parsing a server response.
    Parse(ParseError),
    /// Error validating input data.
    Validate(ValidateError),
    /// The server refused to accept the literal of an APPEND.
    Append,
    /// The operation requires a selected mailbox.
    NotSelected,
    /// No message with the given UID is known in the selected mailbox.
    NoSuchMessage(u32),
    /// The header or body cache could not be read or written.
    Cache(String),
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error::Io(err)
    }
}

impl<T> From<BufError<T>> for Error {
    fn from(err: BufError<T>) -> Error {
        Error::Io(err.into())
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<ValidateError> for Error {
    fn from(err: ValidateError) -> Error {
        Error::Validate(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Error {
        Error::Cache(err.to_string())
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Error {
        Error::Io(err.error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref e) => fmt::Display::fmt(e, f),
            Error::Parse(ref e) => fmt::Display::fmt(e, f),
            Error::Validate(ref e) => fmt::Display::fmt(e, f),
            Error::Bad(ref data) => write!(f, "Bad Response: {}", data),
            Error::No(ref data) => write!(f, "No Response: {}", data),
            Error::Bye(ref data) => write!(f, "Server closed the connection: {}", data),
            Error::ConnectionLost => f.write_str("Connection lost"),
            Error::Fatal => f.write_str("Session is in a fatal state"),
            Error::Timeout => f.write_str("Connection to server timed out"),
            Error::LineTooLong(n) => write!(f, "Response line exceeds {} bytes", n),
            Error::Aborted => f.write_str("Operation aborted"),
            Error::Append => f.write_str("Could not append mail to mailbox"),
            Error::NotSelected => f.write_str("No mailbox is selected"),
            Error::NoSuchMessage(uid) => write!(f, "No message with UID {}", uid),
            Error::Cache(ref e) => write!(f, "Cache error: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            Error::Parse(ParseError::DataNotUtf8(_, ref e)) => Some(e),
            _ => None,
        }
    }
}

/// An error occured while trying to parse a server response.
#[derive(Debug)]
pub enum ParseError {
    /// Indicates an error parsing the status response. Such as OK, NO, and BAD.
    Invalid(Vec<u8>),
    /// The client could not find or decode the server's authentication challenge.
    Authentication(String, Option<base64::DecodeError>),
    /// The client received data that was not UTF-8 encoded.
    DataNotUtf8(Vec<u8>, Utf8Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::Invalid(_) => f.write_str("Unable to parse status response"),
            ParseError::Authentication(_, _) => {
                f.write_str("Unable to parse authentication response")
            }
            ParseError::DataNotUtf8(_, _) => f.write_str("Unable to parse data as UTF-8 text"),
        }
    }
}

impl StdError for ParseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            ParseError::Authentication(_, Some(ref e)) => Some(e),
            _ => None,
        }
    }
}

/// An [invalid character](https://tools.ietf.org/html/rfc3501#section-4.3) was found in an input
/// string.
#[derive(Debug)]
pub struct ValidateError(pub char);

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // print character in debug form because invalid ones are often whitespaces
        write!(f, "Invalid character in input: {:?}", self.0)
    }
}

impl StdError for ValidateError {}
