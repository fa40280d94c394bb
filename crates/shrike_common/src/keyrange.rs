//! Key ranges: half-open byte intervals `[start, end)` over the sharding
//! keyspace.
//!
//! An empty bound stands for the end of the space on that side, so the
//! all-empty range covers everything. Shard names are the canonical textual
//! form: hex bounds joined by `-`, e.g. `"-80"`, `"40-80"`, `"80-"`, and
//! `"-"` for the full range.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ShrikeError;

/// Half-open byte interval `[start, end)`. Empty `start` means the beginning
/// of the space; empty `end` means the end of the space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

/// Errors from parsing or combining key ranges.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyRangeError {
    #[error("invalid shard name {0:?}: expected <start>-<end> with hex bounds")]
    MalformedName(String),

    #[error("invalid shard name {0:?}: bounds are not valid hex")]
    BadHex(String),

    #[error("invalid shard name {0:?}: start must sort before end")]
    Inverted(String),

    #[error("there are no key ranges to combine")]
    Empty,

    #[error("key ranges do not form a contiguous span: hole or overlap at {0}")]
    NotContiguous(KeyRange),
}

impl From<KeyRangeError> for ShrikeError {
    fn from(e: KeyRangeError) -> Self {
        ShrikeError::Validation(e.to_string())
    }
}

impl KeyRange {
    /// The range covering the entire keyspace.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Parse a shard name like `"-80"`, `"40-80"` or `"-"`.
    pub fn parse(name: &str) -> Result<Self, KeyRangeError> {
        let (start, end) = name
            .split_once('-')
            .ok_or_else(|| KeyRangeError::MalformedName(name.to_string()))?;
        if start.contains('-') || end.contains('-') {
            return Err(KeyRangeError::MalformedName(name.to_string()));
        }
        let decode = |part: &str| -> Result<Vec<u8>, KeyRangeError> {
            if part.is_empty() {
                Ok(Vec::new())
            } else {
                hex::decode(part).map_err(|_| KeyRangeError::BadHex(name.to_string()))
            }
        };
        let kr = Self {
            start: decode(start)?,
            end: decode(end)?,
        };
        if !kr.start.is_empty() && !kr.end.is_empty() && kr.start >= kr.end {
            return Err(KeyRangeError::Inverted(name.to_string()));
        }
        Ok(kr)
    }

    pub fn is_full(&self) -> bool {
        self.start.is_empty() && self.end.is_empty()
    }

    /// A degenerate range covers no keys at all. Unconstructible via
    /// `parse`, but representable.
    pub fn is_degenerate(&self) -> bool {
        !self.start.is_empty() && self.start == self.end
    }

    /// Whether two ranges share at least one key position. Commutative;
    /// degenerate ranges intersect nothing.
    pub fn intersects(&self, other: &KeyRange) -> bool {
        if self.is_degenerate() || other.is_degenerate() {
            return false;
        }
        (self.end.is_empty() || other.start < self.end)
            && (other.end.is_empty() || self.start < other.end)
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", hex::encode(&self.start), hex::encode(&self.end))
    }
}

/// Combine ranges into their overall span, requiring them to tile it with
/// no holes and no overlaps. Input order does not matter.
pub fn combine_contiguous(mut ranges: Vec<KeyRange>) -> Result<KeyRange, KeyRangeError> {
    if ranges.is_empty() {
        return Err(KeyRangeError::Empty);
    }
    // Empty starts sort first under plain lexicographic order, which is
    // exactly the bound semantics.
    ranges.sort_by(|a, b| a.start.cmp(&b.start));
    let mut span = ranges[0].clone();
    for kr in &ranges[1..] {
        if span.end != kr.start {
            return Err(KeyRangeError::NotContiguous(kr.clone()));
        }
        span.end = kr.end.clone();
    }
    Ok(span)
}
