use crate::error::{Result, ValidateError};

/// Lovingly borrowed from the cargo crate
///
/// Joins an iterator of [std::fmt::Display]'ables into an output writable
pub(crate) fn iter_join_onto<W, I, T>(mut w: W, iter: I, delim: &str) -> std::fmt::Result
where
    W: std::fmt::Write,
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let mut it = iter.into_iter().peekable();
    while let Some(n) = it.next() {
        write!(w, "{}", n)?;
        if it.peek().is_some() {
            write!(w, "{}", delim)?;
        }
    }
    Ok(())
}

/// Lovingly borrowed from the cargo crate
///
/// Joins an iterator of [std::fmt::Display]'ables to a new [std::string::String].
pub(crate) fn iter_join<I, T>(iter: I, delim: &str) -> String
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let mut s = String::new();
    let _ = iter_join_onto(&mut s, iter, delim);
    s
}

macro_rules! quote {
    ($x:expr) => {
        format!("\"{}\"", $x.replace('\\', r"\\").replace('"', "\\\""))
    };
}

/// Quote a command argument, rejecting characters a quoted string cannot carry.
pub(crate) fn validate_str(value: &str) -> Result<String> {
    if value.contains('\n') {
        return Err(ValidateError('\n').into());
    }
    if value.contains('\r') {
        return Err(ValidateError('\r').into());
    }
    Ok(quote!(value))
}
