use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::error::{RangeError, RangeResult};

/// One byte interval, inclusive on both ends.
///
/// `start: None` is a suffix range (`-500`, the last 500 bytes);
/// `end: None` runs to the end of the object (`500-`). Both `None` is the
/// `*` placeholder, which only [`parse_range_token`] produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start: Some(start), end: Some(end) }
    }

    pub const fn starting_at(start: u64) -> Self {
        Self { start: Some(start), end: None }
    }

    pub const fn suffix(len: u64) -> Self {
        Self { start: None, end: Some(len) }
    }

    /// Number of bytes, when both bounds are known and the count fits.
    pub fn len(&self) -> Option<u64> {
        self.end?.checked_sub(self.start?)?.checked_add(1)
    }

    pub fn is_wildcard(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Whether `next` (starting at or after `self`) overlaps or is adjacent.
    fn reaches(&self, next: &ByteRange) -> bool {
        match (self.end, next.start) {
            (None, _) => true,
            (Some(end), Some(start)) => end.saturating_add(1) >= start,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            return f.write_str("*");
        }
        if let Some(start) = self.start {
            write!(f, "{start}")?;
        }
        f.write_str("-")?;
        if let Some(end) = self.end {
            write!(f, "{end}")?;
        }
        Ok(())
    }
}

/// Parse a single range token: `0-100`, `0-`, `-100` or `*`.
pub fn parse_range_token(token: &str) -> RangeResult<ByteRange> {
    if token == "*" {
        return Ok(ByteRange { start: None, end: None });
    }
    let invalid = || RangeError::InvalidToken(token.to_string());
    let (left, right) = token.split_once('-').ok_or_else(invalid)?;
    if left.is_empty() && right.is_empty() {
        return Err(invalid());
    }
    let bound = |s: &str| -> RangeResult<Option<u64>> {
        if s.is_empty() {
            return Ok(None);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        s.parse().map(Some).map_err(|_| invalid())
    };
    let range = ByteRange { start: bound(left)?, end: bound(right)? };
    if let (Some(start), Some(end)) = (range.start, range.end) {
        if start > end {
            return Err(RangeError::Inverted { start, end });
        }
    }
    Ok(range)
}

/// A parsed `Range` header: unit plus merged, sorted intervals.
///
/// Ranges with a start are sorted ascending and never overlap or touch.
/// Suffix ranges cannot be placed without knowing the object size, so
/// they are kept apart, after the others.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSet {
    unit: String,
    ranges: Vec<ByteRange>,
}

impl RangeSet {
    /// Parse `unit=range(,range)*`. The unit defaults to `bytes`.
    pub fn parse(header: &str) -> RangeResult<Self> {
        let header = header.trim();
        let (unit, spec) = match header.split_once('=') {
            Some((unit, spec)) => (unit.trim(), spec),
            None => ("bytes", header),
        };
        if unit.is_empty() || unit.contains(char::is_whitespace) {
            return Err(RangeError::Malformed(header.to_string()));
        }

        let mut ranges = Vec::new();
        for token in spec.split(',').map(str::trim) {
            if token.is_empty() {
                return Err(RangeError::Malformed(header.to_string()));
            }
            let range = parse_range_token(token)?;
            if range.is_wildcard() {
                return Err(RangeError::Wildcard);
            }
            ranges.push(range);
        }

        let set = Self { unit: unit.to_string(), ranges: merge(ranges) };
        trace!(header, parsed = %set, "parsed range header");
        Ok(set)
    }

    /// A `bytes` set from already-parsed ranges. Wildcards are dropped.
    pub fn from_ranges(ranges: impl IntoIterator<Item = ByteRange>) -> Self {
        let ranges = ranges.into_iter().filter(|r| !r.is_wildcard()).collect();
        Self { unit: "bytes".to_string(), ranges: merge(ranges) }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Only `bytes` ranges are served; any other unit is ignored.
    pub fn is_bytes(&self) -> bool {
        self.unit.eq_ignore_ascii_case("bytes")
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn has_suffix(&self) -> bool {
        self.ranges.iter().any(|r| r.start.is_none())
    }
}

/// Merge to the minimal sorted cover.
///
/// Sorting first means one sweep is enough: anything the current range
/// can reach is adjacent to it in the sorted order, so chains like
/// `0-5,20-30,6-19` collapse completely.
fn merge(ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    let (mut bounded, mut suffixes): (Vec<_>, Vec<_>) =
        ranges.into_iter().partition(|r| r.start.is_some());
    bounded.sort_by_key(|r| r.start);

    let mut out: Vec<ByteRange> = Vec::with_capacity(bounded.len());
    for range in bounded {
        if let Some(last) = out.last_mut() {
            if last.reaches(&range) {
                last.end = match (last.end, range.end) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
                continue;
            }
        }
        out.push(range);
    }

    suffixes.sort_by_key(|r| r.end);
    suffixes.dedup();
    out.extend(suffixes);
    out
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", self.unit)?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

impl FromStr for RangeSet {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
