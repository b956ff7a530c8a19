//! Tokenizers for the parts of server responses the engine inspects.
//!
//! Responses are handled one line at a time, so every parser here works on a single line
//! (without its CRLF) and leaves literals to the line reader.

use chrono::{DateTime, FixedOffset};
use lazy_static::lazy_static;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_till, take_while1},
    character::complete::{char, digit1, space0, space1},
    combinator::{map, map_res, opt, recognize},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use regex::bytes::Regex;
use std::str::{self, FromStr};

use crate::types::{ModSeq, Seq, Uid};

lazy_static! {
    static ref LITERAL_RE: Regex = Regex::new(r"\{(\d+)\}\r?\n?$").unwrap();
}

/// The size of the literal announced at the end of `line`, if any.
pub(crate) fn literal_count(line: &[u8]) -> Option<u64> {
    let caps = LITERAL_RE.captures(line)?;
    str::from_utf8(caps.get(1)?.as_bytes()).ok()?.parse().ok()
}

fn is_atom_char(c: u8) -> bool {
    c > 0x20 && c < 0x7f && !b"(){%*\"\\]".contains(&c)
}

fn is_flag_char(c: u8) -> bool {
    c > 0x20 && c != b'(' && c != b')' && c != 0x7f
}

fn is_name_char(c: u8) -> bool {
    c > 0x20 && c != b'(' && c != b')' && c != b'{' && c != b'"'
}

pub(crate) fn number<T: FromStr>(input: &[u8]) -> IResult<&[u8], T> {
    map_res(digit1, |d: &[u8]| {
        str::from_utf8(d)
            .map_err(|_| ())
            .and_then(|s| s.parse::<T>().map_err(|_| ()))
    })(input)
}

/// A quoted string, with `\\` and `\"` unescaped.
pub(crate) fn quoted(input: &[u8]) -> IResult<&[u8], String> {
    let (mut rest, _) = char('"')(input)?;
    let mut out = Vec::new();
    loop {
        match rest {
            [b'\\', c, tail @ ..] => {
                out.push(*c);
                rest = tail;
            }
            [b'"', tail @ ..] => {
                rest = tail;
                break;
            }
            [c, tail @ ..] => {
                out.push(*c);
                rest = tail;
            }
            [] => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    rest,
                    nom::error::ErrorKind::Char,
                )))
            }
        }
    }
    Ok((rest, String::from_utf8_lossy(&out).into_owned()))
}

fn nil(input: &[u8]) -> IResult<&[u8], &[u8]> {
    tag_no_case("NIL")(input)
}

/// A mailbox name that is not a literal: either quoted or a bare atom.
pub(crate) fn mailbox_name(input: &[u8]) -> IResult<&[u8], String> {
    alt((
        quoted,
        map(take_while1(is_name_char), |s: &[u8]| {
            String::from_utf8_lossy(s).into_owned()
        }),
    ))(input)
}

/// `(\Seen $Junk)`
pub(crate) fn flag_list(input: &[u8]) -> IResult<&[u8], Vec<&str>> {
    delimited(
        pair(char('('), space0),
        separated_list0(
            space1,
            map_res(take_while1(is_flag_char), str::from_utf8),
        ),
        pair(space0, char(')')),
    )(input)
}

/// The delimiter of a LIST response: a quoted character or NIL.
pub(crate) fn delimiter(input: &[u8]) -> IResult<&[u8], Option<char>> {
    alt((
        map(nil, |_| None),
        map(quoted, |s| s.chars().next()),
    ))(input)
}

/// `* <n> <word>` for the numeric untagged responses.
pub(crate) fn numeric_response(input: &[u8]) -> IResult<&[u8], (u32, &str)> {
    preceded(
        tag("* "),
        tuple((
            terminated(number, space1),
            map_res(take_while1(|c: u8| c.is_ascii_alphabetic()), str::from_utf8),
        )),
    )(input)
}

/// A tagged line carrying a response code: `a0001 OK [READ-ONLY] ...`.
pub(crate) fn tagged_code(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(tuple((
        take_while1(is_atom_char),
        char(' '),
        tag_no_case("OK"),
        char(' '),
        char('['),
    )))(input)
}

/// The response code of a status response, such as `TRYCREATE` in `a0002 NO [TRYCREATE] ...`.
pub(crate) fn response_code(line: &[u8]) -> Option<&str> {
    let status = next_word(line);
    let code = next_word(status);
    let (_, code) = delimited(
        char::<_, nom::error::Error<&[u8]>>('['),
        take_till(|c| c == b']'),
        char(']'),
    )(code)
    .ok()?;
    str::from_utf8(code).ok()
}

/// The human readable text of a status response, after any response code.
pub(crate) fn response_text(line: &[u8]) -> String {
    let mut text = next_word(next_word(line));
    if text.starts_with(b"[") {
        if let Some(end) = text.iter().position(|&c| c == b']') {
            text = &text[end + 1..];
        }
    }
    String::from_utf8_lossy(text).trim().to_string()
}

/// Skip the current word (quoted strings count as one word) and the blanks after it.
pub(crate) fn next_word(s: &[u8]) -> &[u8] {
    let mut quoted = false;
    let mut i = 0;
    while i < s.len() {
        match s[i] {
            b'\\' if quoted => i += 1,
            b'"' => quoted = !quoted,
            b' ' | b'\t' if !quoted => break,
            _ => {}
        }
        i += 1;
    }
    trim_start(&s[i.min(s.len())..])
}

/// Parse an `INTERNALDATE` value such as `"17-Jul-1996 02:44:25 -0700"`.
pub(crate) fn internal_date(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(s.trim(), "%d-%b-%Y %H:%M:%S %z").ok()
}

/// Attribute name of a FETCH item, including a body section and partial range.
fn fetch_attr(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(tuple((
        take_while1(|c: u8| is_atom_char(c) && c != b'[' && c != b'<'),
        opt(delimited(char('['), take_till(|c| c == b']'), char(']'))),
        opt(delimited(char('<'), digit1, char('>'))),
    )))(input)
}

/// Skip one FETCH value we do not interpret. `None` if the value cannot be skipped on this
/// line, for instance because it contains a literal.
fn skip_value(input: &[u8]) -> Option<&[u8]> {
    match input.first()? {
        b'(' => {
            let mut depth = 0usize;
            let mut i = 0;
            while i < input.len() {
                match input[i] {
                    b'"' => {
                        let (rest, _) = quoted(&input[i..]).ok()?;
                        i = input.len() - rest.len();
                        continue;
                    }
                    b'(' => depth += 1,
                    b')' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(&input[i + 1..]);
                        }
                    }
                    b'{' => return None,
                    _ => {}
                }
                i += 1;
            }
            None
        }
        b'"' => quoted(input).ok().map(|(rest, _)| rest),
        b'{' => None,
        _ => {
            let (rest, _) =
                take_while1::<_, _, nom::error::Error<&[u8]>>(|c: u8| c > 0x20 && c != b')')(input)
                    .ok()?;
            Some(rest)
        }
    }
}

/// Where parsing of a FETCH attribute list stopped.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ItemsEnd {
    /// The closing parenthesis was reached.
    Closed,
    /// A value continues as a literal of the given size; `name` is the attribute it belongs to.
    Literal { name: String, size: u64 },
    /// Parsing stopped early on something that could not be interpreted.
    Truncated,
}

/// The FETCH attributes the engine cares about.
#[derive(Debug, Default)]
pub(crate) struct FetchItems {
    pub uid: Option<Uid>,
    pub flags: Option<Vec<String>>,
    pub modseq: Option<ModSeq>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub size: Option<u32>,
}

/// Split `* <msn> FETCH (` off a line, returning the MSN and the attribute list.
pub(crate) fn fetch_start(line: &[u8]) -> Option<(Seq, &[u8])> {
    let (rest, (msn, _)) = tuple((
        preceded(tag("* "), number::<Seq>),
        tuple((space1, tag_no_case("FETCH"), space0, char('('))),
    ))(line)
    .ok()?;
    Some((msn, rest))
}

impl FetchItems {
    /// Parse attributes from `input` until the list closes or a literal begins.
    ///
    /// Called once on the FETCH line and again on the remainder of the line after a literal.
    pub(crate) fn parse(&mut self, mut input: &[u8]) -> ItemsEnd {
        loop {
            let (rest, _) = match space0::<_, nom::error::Error<&[u8]>>(input) {
                Ok(r) => r,
                Err(_) => return ItemsEnd::Truncated,
            };
            input = rest;
            match input.first() {
                None => return ItemsEnd::Truncated,
                Some(b')') => return ItemsEnd::Closed,
                Some(_) => {}
            }

            let (rest, name) = match terminated(fetch_attr, space1)(input) {
                Ok(r) => r,
                Err(_) => {
                    log::debug!("unparseable FETCH attribute: {}", String::from_utf8_lossy(input));
                    return ItemsEnd::Truncated;
                }
            };
            let name = String::from_utf8_lossy(name).to_ascii_uppercase();
            input = rest;

            if input.first() == Some(&b'{') {
                return match literal_count(input) {
                    Some(size) => ItemsEnd::Literal { name, size },
                    None => ItemsEnd::Truncated,
                };
            }

            let parsed = match name.as_str() {
                "UID" => number::<Uid>(input).ok().map(|(rest, uid)| {
                    self.uid = Some(uid);
                    rest
                }),
                "FLAGS" => flag_list(input).ok().map(|(rest, flags)| {
                    self.flags = Some(flags.into_iter().map(str::to_string).collect());
                    rest
                }),
                "MODSEQ" => delimited(char('('), number::<ModSeq>, char(')'))(input)
                    .ok()
                    .map(|(rest, modseq)| {
                        self.modseq = Some(modseq);
                        rest
                    }),
                "INTERNALDATE" => quoted(input).ok().map(|(rest, date)| {
                    self.internal_date = internal_date(&date);
                    rest
                }),
                "RFC822.SIZE" => number::<u32>(input).ok().map(|(rest, size)| {
                    self.size = Some(size);
                    rest
                }),
                _ => skip_value(input),
            };
            match parsed {
                Some(rest) => input = rest,
                None => {
                    log::debug!("cannot parse FETCH {} value", name);
                    return ItemsEnd::Truncated;
                }
            }
        }
    }
}

/// Whitespace separated words of a line, lossily decoded.
pub(crate) fn words(s: &[u8]) -> impl Iterator<Item = &str> {
    s.split(|c| c.is_ascii_whitespace())
        .filter(|w| !w.is_empty())
        .filter_map(|w| str::from_utf8(w).ok())
}

/// Skip leading whitespace.
pub(crate) fn trim_start(s: &[u8]) -> &[u8] {
    let skip = s.iter().take_while(|c| c.is_ascii_whitespace()).count();
    &s[skip..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(literal_count(b"* 1 FETCH (BODY[] {342}"), Some(342));
        assert_eq!(literal_count(b"* 1 FETCH (BODY[] {342}\r\n"), Some(342));
        assert_eq!(literal_count(b"* 1 FETCH (FLAGS ())"), None);
        assert_eq!(literal_count(b"* LIST () \"/\" {4}"), Some(4));
    }

    #[test]
    fn words_and_codes() {
        assert_eq!(next_word(b"a0001 OK done"), b"OK done");
        assert_eq!(next_word(b"\"a b\" c"), b"c");
        assert_eq!(next_word(b"last"), b"");
        assert_eq!(response_code(b"a0002 NO [TRYCREATE] No such mailbox"), Some("TRYCREATE"));
        assert_eq!(response_code(b"a0002 NO No such mailbox"), None);
        assert_eq!(response_text(b"a0002 NO [TRYCREATE] No such mailbox"), "No such mailbox");
        assert!(tagged_code(b"a0003 OK [READ-ONLY] done").is_ok());
        assert!(tagged_code(b"a0003 OK done").is_err());
        assert!(tagged_code(b"* OK [UIDNEXT 4]").is_err());
    }

    #[test]
    fn flags() {
        let (rest, flags) = flag_list(b"(\\Seen $Junk \\*) tail").unwrap();
        assert_eq!(flags, vec!["\\Seen", "$Junk", "\\*"]);
        assert_eq!(rest, b" tail");
        assert_eq!(flag_list(b"()").unwrap().1, Vec::<&str>::new());
    }

    #[test]
    fn quoting() {
        assert_eq!(quoted(b"\"a\\\"b\" x").unwrap(), (&b" x"[..], "a\"b".to_string()));
        assert_eq!(mailbox_name(b"INBOX.Sent (").unwrap().1, "INBOX.Sent");
        assert_eq!(delimiter(b"NIL \"x\"").unwrap().1, None);
        assert_eq!(delimiter(b"\"/\" x").unwrap().1, Some('/'));
    }

    #[test]
    fn fetch_attributes_in_any_order() {
        let line = b"* 12 FETCH (MODSEQ (624140003) X-GM-LABELS (\\Inbox \"a b\") FLAGS (\\Seen) UID 44 \
                     INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" RFC822.SIZE 4286)";
        let (msn, rest) = fetch_start(line).unwrap();
        assert_eq!(msn, 12);
        let mut items = FetchItems::default();
        assert_eq!(items.parse(rest), ItemsEnd::Closed);
        assert_eq!(items.uid, Some(44));
        assert_eq!(items.modseq, Some(624140003));
        assert_eq!(items.flags, Some(vec!["\\Seen".to_string()]));
        assert_eq!(items.size, Some(4286));
        assert!(items.internal_date.is_some());
    }

    #[test]
    fn fetch_stops_at_literal() {
        let line = b"* 3 FETCH (UID 7 BODY[HEADER.FIELDS (DATE FROM)] {120}";
        let (_, rest) = fetch_start(line).unwrap();
        let mut items = FetchItems::default();
        assert_eq!(
            items.parse(rest),
            ItemsEnd::Literal {
                name: "BODY[HEADER.FIELDS (DATE FROM)]".to_string(),
                size: 120
            }
        );
        assert_eq!(items.uid, Some(7));

        // the remainder of the line after the literal
        assert_eq!(items.parse(b" FLAGS (\\Seen))"), ItemsEnd::Closed);
        assert_eq!(items.flags, Some(vec!["\\Seen".to_string()]));
    }

    #[test]
    fn numeric() {
        assert_eq!(numeric_response(b"* 23 EXISTS").unwrap().1, (23, "EXISTS"));
        assert!(numeric_response(b"* OK ready").is_err());
    }
}
