/// This will allow plugable authentication mechanisms.
///
/// This trait is used by [`Session::authenticate`](crate::Session::authenticate) to
/// [authenticate](https://tools.ietf.org/html/rfc3501#section-6.2.2) with an IMAP server.
/// Challenges arrive base64-decoded and responses are base64-encoded before they are sent.
pub trait Authenticator {
    /// Type of the response to the challenge. This will usually be a `Vec<u8>` or `String`.
    type Response: AsRef<[u8]>;

    /// Each base64-decoded server challenge is passed to `process`.
    /// The returned byte-string is base64-encoded and then sent back to the server.
    fn process(&self, challenge: &[u8]) -> Self::Response;
}
