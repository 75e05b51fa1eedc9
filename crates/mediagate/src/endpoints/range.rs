//! Parsing and resolution of `Range` request headers.
//!
//! Only single byte ranges are supported. Requests for multiple ranges are answered with the full
//! resource, which is a valid response to any range request.

use std::fmt;
use std::str::FromStr;

/// A single range from a `Range` header, before the size of the resource is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=<start>-<end>`, both inclusive.
    Bounded { start: u64, end: u64 },
    /// `bytes=<start>-`, until the end of the resource.
    From { start: u64 },
    /// `bytes=-<len>`, the last `len` bytes of the resource.
    Suffix { len: u64 },
}

/// An error which can be returned when parsing a [`ByteRange`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRange {
    /// The header is malformed.
    #[error("range header is malformed")]
    Malformed,
    /// The specified unit is not `bytes`.
    #[error("range unit is not bytes")]
    NotBytes,
    /// More than one range was requested.
    #[error("multiple ranges are not supported")]
    MultipleRanges,
}

/// Parses a decimal offset, refusing signs and whitespace that [`u64::from_str`] would accept.
fn parse_offset(s: &str) -> Result<u64, InvalidRange> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidRange::Malformed);
    }
    s.parse().map_err(|_| InvalidRange::Malformed)
}

impl FromStr for ByteRange {
    type Err = InvalidRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (unit, spec) = s.trim().split_once('=').ok_or(InvalidRange::Malformed)?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(InvalidRange::NotBytes);
        }
        if spec.contains(',') {
            return Err(InvalidRange::MultipleRanges);
        }

        let (start, end) = spec
            .trim()
            .split_once('-')
            .ok_or(InvalidRange::Malformed)?;

        match (start.trim(), end.trim()) {
            ("", "") => Err(InvalidRange::Malformed),
            ("", len) => Ok(Self::Suffix {
                len: parse_offset(len)?,
            }),
            (start, "") => Ok(Self::From {
                start: parse_offset(start)?,
            }),
            (start, end) => {
                let start = parse_offset(start)?;
                let end = parse_offset(end)?;
                if end < start {
                    return Err(InvalidRange::Malformed);
                }
                Ok(Self::Bounded { start, end })
            }
        }
    }
}

impl ByteRange {
    /// Applies the range to a resource of `size` bytes.
    ///
    /// An end beyond the resource is clamped to its last byte. Returns `None` if the range does
    /// not contain a single byte of the resource.
    pub fn resolve(self, size: u64) -> Option<Range> {
        let last = size.checked_sub(1)?;
        let (start, end) = match self {
            Self::Bounded { start, end } => (start, end.min(last)),
            Self::From { start } => (start, last),
            Self::Suffix { len: 0 } => return None,
            Self::Suffix { len } => (size.saturating_sub(len), last),
        };
        (start <= last).then_some(Range { start, end })
    }
}

/// A satisfiable range of a resource.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Range {
    /// Start of the range, inclusive.
    pub start: u64,
    /// End of the range, inclusive.
    pub end: u64,
}

impl Range {
    /// Returns the amount of bytes the range contains.
    pub fn size(&self) -> u64 {
        // A 0-0 range is 1 byte in size.
        self.end - self.start + 1
    }

    /// The value of the `Content-Range` header describing this range of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.start, self.end)
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<ByteRange, InvalidRange> {
        s.parse()
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            parse("bytes=100-199"),
            Ok(ByteRange::Bounded {
                start: 100,
                end: 199
            })
        );
        assert_eq!(parse("bytes=0-0"), Ok(ByteRange::Bounded { start: 0, end: 0 }));
        assert_eq!(parse("bytes=500-"), Ok(ByteRange::From { start: 500 }));
        assert_eq!(parse("bytes=-20"), Ok(ByteRange::Suffix { len: 20 }));
        assert_eq!(parse(" Bytes = 1 - 2 "), Ok(ByteRange::Bounded { start: 1, end: 2 }));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse("items=0-1"), Err(InvalidRange::NotBytes));
        assert_eq!(parse("bytes=0-1,5-6"), Err(InvalidRange::MultipleRanges));

        for malformed in [
            "",
            "bytes",
            "bytes=",
            "bytes=-",
            "bytes=5",
            "bytes=a-b",
            "bytes=+1-2",
            "bytes=-+2",
            "bytes=200-100",
            "bytes=1-2-3",
            "bytes=99999999999999999999-",
        ] {
            assert_eq!(parse(malformed), Err(InvalidRange::Malformed), "{malformed:?}");
        }
    }

    #[test]
    fn test_resolve() {
        let resolve = |s: &str, size| parse(s).unwrap().resolve(size);

        assert_eq!(
            resolve("bytes=100-199", 1000),
            Some(Range {
                start: 100,
                end: 199
            })
        );
        // clamped to the last byte
        assert_eq!(
            resolve("bytes=900-2000", 1000),
            Some(Range {
                start: 900,
                end: 999
            })
        );
        assert_eq!(
            resolve("bytes=10-", 1000),
            Some(Range {
                start: 10,
                end: 999
            })
        );
        assert_eq!(
            resolve("bytes=-100", 1000),
            Some(Range {
                start: 900,
                end: 999
            })
        );
        // a suffix longer than the resource selects all of it
        assert_eq!(
            resolve("bytes=-5000", 1000),
            Some(Range { start: 0, end: 999 })
        );

        assert_eq!(resolve("bytes=2000-2100", 1000), None);
        assert_eq!(resolve("bytes=1000-", 1000), None);
        assert_eq!(resolve("bytes=-0", 1000), None);
        assert_eq!(resolve("bytes=0-0", 0), None);
        assert_eq!(resolve("bytes=-10", 0), None);
    }

    #[test]
    fn test_content_range() {
        let range = parse("bytes=-100").unwrap().resolve(1000).unwrap();
        assert_eq!(range.size(), 100);
        insta::assert_snapshot!(range.content_range(1000), @"bytes 900-999/1000");
    }
}
