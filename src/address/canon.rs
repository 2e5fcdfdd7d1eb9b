use smallvec::SmallVec;

use super::key::CanonicalKey;
use crate::error::AddressFault;

/// What to do with a line that is not a well-formed IPv6 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParsePolicy {
    /// Reject the line (and the run).
    #[default]
    Strict,
    /// Best effort: bad or missing hextets read as 0, surplus hextets are dropped.
    Lenient,
}

impl std::str::FromStr for ParsePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ParsePolicy::Strict),
            "lenient" | "best-effort" => Ok(ParsePolicy::Lenient),
            other => Err(format!("unknown parse policy: {other}")),
        }
    }
}

type Hextets<'a> = SmallVec<[&'a str; 8]>;

#[inline]
fn split_hextets(s: &str) -> Hextets<'_> {
    if s.is_empty() {
        return SmallVec::new();
    }
    s.split(':').collect()
}

/// 1..=4 hex digits, either case. No signs, no prefixes.
#[inline]
fn parse_hextet(h: &str) -> Option<u16> {
    if h.is_empty() || h.len() > 4 {
        return None;
    }
    let mut v = 0u16;
    for c in h.chars() {
        v = (v << 4) | c.to_digit(16)? as u16;
    }
    Some(v)
}

/// Canonicalize one line under `policy`. Surrounding whitespace is ignored.
pub fn canonicalize(line: &str, policy: ParsePolicy) -> Result<CanonicalKey, AddressFault> {
    match policy {
        ParsePolicy::Strict => canonicalize_strict(line),
        ParsePolicy::Lenient => Ok(canonicalize_lenient(line)),
    }
}

pub fn canonicalize_strict(line: &str) -> Result<CanonicalKey, AddressFault> {
    let s = line.trim();
    let mut groups = [0u16; 8];

    let (left, right): (Hextets<'_>, Hextets<'_>) = match s.find("::") {
        Some(pos) => {
            let tail = &s[pos + 2..];
            if tail.contains("::") {
                return Err(AddressFault::RepeatedCompression);
            }
            let (l, r) = (split_hextets(&s[..pos]), split_hextets(tail));
            if l.len() + r.len() > 7 {
                return Err(if l.len() + r.len() == 8 {
                    AddressFault::EmptyCompression
                } else {
                    AddressFault::GroupCount(l.len() + r.len())
                });
            }
            (l, r)
        }
        None => {
            let all = split_hextets(s);
            if all.len() != 8 {
                return Err(AddressFault::GroupCount(all.len()));
            }
            (all, SmallVec::new())
        }
    };

    let right_start = 8 - right.len();
    let slots = left
        .iter()
        .zip(0usize..)
        .chain(right.iter().zip(right_start..));
    for (h, idx) in slots {
        groups[idx] = parse_hextet(h).ok_or_else(|| AddressFault::BadHextet((*h).to_string()))?;
    }

    Ok(CanonicalKey::from_groups(&groups))
}

/// Never fails; malformed pieces collapse to zero groups.
pub fn canonicalize_lenient(line: &str) -> CanonicalKey {
    let s = line.trim();
    let mut groups = [0u16; 8];

    let (left, right) = match s.find("::") {
        Some(pos) => (split_hextets(&s[..pos]), split_hextets(&s[pos + 2..])),
        None => (split_hextets(s), SmallVec::new()),
    };

    let zeros = 8usize.saturating_sub(left.len() + right.len());
    let mut idx = 0;
    for h in &left {
        if idx == 8 {
            break;
        }
        groups[idx] = parse_hextet(h).unwrap_or(0);
        idx += 1;
    }
    idx += zeros;
    for h in &right {
        if idx >= 8 {
            break;
        }
        groups[idx] = parse_hextet(h).unwrap_or(0);
        idx += 1;
    }

    CanonicalKey::from_groups(&groups)
}
