//! Sequence sets (`1:4,7,9:12`), as read from the server and as written in commands.

use crate::index::MsnIndex;
use crate::types::Seq;

/// Stop growing a sequence set once its text is longer than this.
pub(crate) const MAX_SEQSET_LEN: usize = 500;

/// Iterates over the numbers of a sequence set in the order they are written.
///
/// Ranges written backwards (`9:7`) are walked upwards. A part that does not parse is
/// yielded as `Err` with its text so the caller can log it and go on.
pub(crate) struct SeqsetIter<'a> {
    parts: std::str::Split<'a, char>,
    range: Option<(u32, u32)>,
}

impl<'a> SeqsetIter<'a> {
    pub(crate) fn new(set: &'a str) -> Self {
        SeqsetIter {
            parts: set.split(','),
            range: None,
        }
    }

    fn parse_part(part: &str) -> Option<(u32, u32)> {
        match part.split_once(':') {
            Some((a, b)) => {
                let a: u32 = a.trim().parse().ok()?;
                let b: u32 = b.trim().parse().ok()?;
                Some((a.min(b), a.max(b)))
            }
            None => {
                let n = part.trim().parse().ok()?;
                Some((n, n))
            }
        }
    }
}

impl<'a> Iterator for SeqsetIter<'a> {
    type Item = Result<u32, &'a str>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((cur, end)) = self.range {
                self.range = if cur < end { Some((cur + 1, end)) } else { None };
                return Some(Ok(cur));
            }
            let part = self.parts.next()?;
            if part.is_empty() {
                continue;
            }
            match Self::parse_part(part) {
                Some(range) => self.range = Some(range),
                None => return Some(Err(part)),
            }
        }
    }
}

/// Compresses ascending numbers into sequence set text.
#[derive(Debug, Default)]
pub(crate) struct SeqsetBuilder {
    sets: Vec<String>,
    current: String,
    range: Option<(u32, u32)>,
    limit: Option<usize>,
}

impl SeqsetBuilder {
    pub(crate) fn new() -> Self {
        SeqsetBuilder::default()
    }

    /// Start a new set instead of growing the current one past `limit` characters.
    pub(crate) fn with_limit(limit: usize) -> Self {
        SeqsetBuilder {
            limit: Some(limit),
            ..SeqsetBuilder::default()
        }
    }

    pub(crate) fn push(&mut self, n: u32) {
        match self.range {
            Some((start, end)) if end.checked_add(1) == Some(n) => self.range = Some((start, n)),
            Some(_) => {
                self.flush_range();
                self.range = Some((n, n));
            }
            None => self.range = Some((n, n)),
        }
    }

    fn flush_range(&mut self) {
        let part = match self.range.take() {
            Some((start, end)) if start == end => start.to_string(),
            Some((start, end)) => format!("{}:{}", start, end),
            None => return,
        };
        if let Some(limit) = self.limit {
            if !self.current.is_empty() && self.current.len() + 1 + part.len() > limit {
                self.sets.push(std::mem::take(&mut self.current));
            }
        }
        if !self.current.is_empty() {
            self.current.push(',');
        }
        self.current.push_str(&part);
    }

    /// All sets built so far. Without a limit there is at most one.
    pub(crate) fn finish(mut self) -> Vec<String> {
        self.flush_range();
        if !self.current.is_empty() {
            self.sets.push(self.current);
        }
        self.sets
    }

    /// The single set built so far.
    pub(crate) fn build(self) -> String {
        self.finish().join(",")
    }
}

/// Build the MSN set for the next chunk of a header download.
///
/// Without `use_index`, every MSN in range is wanted and a plain `begin:end` range is used when
/// it fits in one chunk. Otherwise runs of MSNs whose index slot is still empty are collected,
/// until `max` MSNs are covered or the set text grows too long. Returns the set, the last MSN
/// the chunk scanned, and the number of MSNs it covers.
pub(crate) fn msn_fetch_set(
    index: &MsnIndex,
    use_index: bool,
    begin: Seq,
    end: Seq,
    max: u32,
) -> (String, Seq, u32) {
    if end < begin {
        return (String::new(), end, 0);
    }
    let max = if max == 0 { u32::MAX } else { max };

    if !use_index && end - begin < max {
        return (format!("{}:{}", begin, end), end, end - begin + 1);
    }

    let mut out = String::new();
    let mut count = 0u32;
    let mut range: Option<(Seq, Seq)> = None;
    let mut msn = begin;
    // one past the end so an open range gets written out
    while msn <= end.saturating_add(1) {
        let wanted = count < max && msn <= end && index.get(msn).is_none();
        if wanted {
            count += 1;
            range = match range {
                Some((start, _)) => Some((start, msn)),
                None => Some((msn, msn)),
            };
        } else if let Some((start, stop)) = range.take() {
            if !out.is_empty() {
                out.push(',');
            }
            if start == stop {
                out.push_str(&start.to_string());
            } else {
                out.push_str(&format!("{}:{}", start, stop));
            }
            if out.len() > MAX_SEQSET_LEN || count >= max {
                break;
            }
        }
        if msn == u32::MAX {
            break;
        }
        msn += 1;
    }
    (out, msn.saturating_sub(1).min(end), count)
}
