//! # TimeUUID Module
//!
//! Ordering keys for the event store: a 128-bit identifier in RFC 4122 v1
//! layout carrying a **60-bit timestamp** (100 ns ticks) in its high time
//! fields and **62 bits of entropy** in the clock-sequence and node fields.
//!
//! ## Design Invariants
//!
//! - The total order is `(timestamp, raw bytes)` ascending. Two ids minted
//!   at the same instant are tie-broken by their entropy bytes.
//! - [`TimeUuid::to_lex`] produces a **fixed-width** ASCII key whose plain
//!   byte order equals the temporal order above. The memtable and the SST
//!   key namespace are keyed by this form, so row-major iteration of any
//!   ordered store yields time-sorted output.
//! - `Lowest` entropy sorts at-or-below and `Highest` at-or-above every
//!   real id minted for the same tick, which is how half-open time-range
//!   bounds are synthesized from wall-clock timestamps.
//!
//! ## Time units
//!
//! The public time unit is the **tick**: a 100 ns interval counted from the
//! UNIX epoch. The v1 wire layout internally rebases ticks onto the
//! Gregorian epoch (1582-10-15) as RFC 4122 requires.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Number of 100 ns ticks per second.
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Ticks between the Gregorian epoch (1582-10-15) and the UNIX epoch.
const GREGORIAN_UNIX_OFFSET: u64 = 0x01B2_1DD2_1381_4000;

/// Width in bytes of the lexicographic form: 20 decimal digits of tick
/// count followed by 32 hex digits of the raw id bytes.
///
/// Composite memtable keys are `stream ‖ lex(id)`; the stream name is
/// recovered by trimming this fixed-width suffix.
pub const LEX_LEN: usize = 52;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`TimeUuid`] parsing and comparison helpers.
#[derive(Debug, Error)]
pub enum TimeUuidError {
    /// Input did not decode as a time-UUID.
    #[error("malformed time-uuid: {0}")]
    Malformed(String),

    /// A comparison was requested against a value that is not a time-UUID.
    #[error("compared time-uuid to non-uuid value: {0:?}")]
    InvalidComparison(String),
}

// ------------------------------------------------------------------------------------------------
// Entropy kinds
// ------------------------------------------------------------------------------------------------

/// How the 62 entropy bits of a freshly minted id are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyKind {
    /// Minimum entropy bits — sorts at-or-below every id for the tick.
    Lowest,

    /// Maximum entropy bits — sorts at-or-above every id for the tick.
    Highest,

    /// Random entropy bits — used for server-assigned event ids.
    Random,
}

// ------------------------------------------------------------------------------------------------
// TimeUuid Core
// ------------------------------------------------------------------------------------------------

/// A 128-bit identifier whose natural order matches wall-clock order.
///
/// Stored as raw RFC 4122 v1 bytes. Comparison is **not** plain byte
/// order — the v1 layout puts the low time bits first — so [`Ord`] is
/// implemented over `(timestamp, raw bytes)` and [`TimeUuid::to_lex`]
/// exists for stores that need a byte-comparable rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeUuid {
    bytes: [u8; 16],
}

impl TimeUuid {
    /// Sentinel below every valid id.
    pub const MIN: TimeUuid = TimeUuid { bytes: [0u8; 16] };

    /// Sentinel above every valid id.
    pub const MAX: TimeUuid = TimeUuid { bytes: [0xFF; 16] };

    /// Mints an id for the given tick count with the requested entropy.
    pub fn from_time(ticks: u64, kind: EntropyKind) -> Self {
        let (clock_seq, node) = match kind {
            EntropyKind::Lowest => (0u16, 0u64),
            EntropyKind::Highest => (0x3FFF, 0xFFFF_FFFF_FFFF),
            EntropyKind::Random => (
                rand::random::<u16>() & 0x3FFF,
                rand::random::<u64>() & 0xFFFF_FFFF_FFFF,
            ),
        };
        Self::from_parts(ticks, clock_seq, node)
    }

    /// Mints a random-entropy id stamped with the current wall clock.
    pub fn now() -> Self {
        Self::from_time(now_ticks(), EntropyKind::Random)
    }

    /// Packs `(ticks, clock_seq, node)` into the v1 wire layout.
    ///
    /// `clock_seq` uses its low 14 bits, `node` its low 48.
    fn from_parts(ticks: u64, clock_seq: u16, node: u64) -> Self {
        let gregorian = ticks.saturating_add(GREGORIAN_UNIX_OFFSET);

        let time_low = (gregorian & 0xFFFF_FFFF) as u32;
        let time_mid = ((gregorian >> 32) & 0xFFFF) as u16;
        let time_hi = (((gregorian >> 48) & 0x0FFF) as u16) | 0x1000; // version 1

        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&time_low.to_be_bytes());
        bytes[4..6].copy_from_slice(&time_mid.to_be_bytes());
        bytes[6..8].copy_from_slice(&time_hi.to_be_bytes());
        bytes[8] = 0x80 | ((clock_seq >> 8) as u8 & 0x3F); // RFC variant
        bytes[9] = clock_seq as u8;
        bytes[10..16].copy_from_slice(&node.to_be_bytes()[2..8]);

        Self { bytes }
    }

    /// Returns the raw 16-byte representation.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Reconstructs an id from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Returns the embedded timestamp in ticks since the UNIX epoch.
    ///
    /// The [`MIN`](Self::MIN) sentinel (all-zero bytes) predates the UNIX
    /// epoch and saturates to 0.
    pub fn timestamp(&self) -> u64 {
        let time_low = u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]]) as u64;
        let time_mid = u16::from_be_bytes([self.bytes[4], self.bytes[5]]) as u64;
        let time_hi = (u16::from_be_bytes([self.bytes[6], self.bytes[7]]) & 0x0FFF) as u64;
        let gregorian = (time_hi << 48) | (time_mid << 32) | time_low;
        gregorian.saturating_sub(GREGORIAN_UNIX_OFFSET)
    }

    /// Serializes into the fixed-width lexicographic key form.
    ///
    /// The output is exactly [`LEX_LEN`] ASCII bytes and its byte order
    /// equals the temporal order of the ids.
    pub fn to_lex(&self) -> String {
        let mut out = String::with_capacity(LEX_LEN);
        out.push_str(&format!("{:020}", self.timestamp()));
        for byte in &self.bytes {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Decodes a key previously produced by [`to_lex`](Self::to_lex).
    pub fn from_lex(lex: &[u8]) -> Result<Self, TimeUuidError> {
        if lex.len() != LEX_LEN {
            return Err(TimeUuidError::Malformed(format!(
                "lexicographic key must be {LEX_LEN} bytes, got {}",
                lex.len()
            )));
        }
        let hex = &lex[20..];
        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk)
                .map_err(|_| TimeUuidError::Malformed("non-ascii lexicographic key".into()))?;
            bytes[i] = u8::from_str_radix(s, 16)
                .map_err(|_| TimeUuidError::Malformed(format!("bad hex digits {s:?}")))?;
        }
        let id = Self { bytes };

        // The decimal prefix is redundant with the embedded timestamp;
        // a disagreement means the key was corrupted or hand-built.
        let prefix = std::str::from_utf8(&lex[..20])
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| TimeUuidError::Malformed("bad tick prefix".into()))?;
        if prefix != id.timestamp() {
            return Err(TimeUuidError::Malformed(format!(
                "tick prefix {prefix} disagrees with embedded timestamp {}",
                id.timestamp()
            )));
        }
        Ok(id)
    }

    /// Parses the canonical hyphenated form (`xxxxxxxx-xxxx-…`).
    pub fn parse(s: &str) -> Result<Self, TimeUuidError> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 || s.len() != 36 || !hex.is_ascii() {
            return Err(TimeUuidError::Malformed(format!(
                "expected hyphenated uuid, got {s:?}"
            )));
        }
        let mut bytes = [0u8; 16];
        for i in 0..16 {
            bytes[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| TimeUuidError::Malformed(format!("bad hex digits in {s:?}")))?;
        }
        Ok(Self { bytes })
    }

    /// Compares against an untyped string id.
    ///
    /// Fails with [`TimeUuidError::InvalidComparison`] when the other
    /// value does not parse as a time-UUID.
    pub fn cmp_str(&self, other: &str) -> Result<Ordering, TimeUuidError> {
        let other = Self::parse(other)
            .map_err(|_| TimeUuidError::InvalidComparison(other.to_string()))?;
        Ok(self.cmp(&other))
    }

    /// Compares against an optional id; a populated id is greater than none.
    pub fn cmp_option(&self, other: Option<&TimeUuid>) -> Ordering {
        match other {
            Some(other) => self.cmp(other),
            None => Ordering::Greater,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Ordering — (timestamp, raw bytes)
// ------------------------------------------------------------------------------------------------

impl Ord for TimeUuid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp()
            .cmp(&other.timestamp())
            .then_with(|| self.bytes.cmp(&other.bytes))
    }
}

impl PartialOrd for TimeUuid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ------------------------------------------------------------------------------------------------
// Display / serde
// ------------------------------------------------------------------------------------------------

impl fmt::Display for TimeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Serialize for TimeUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.bytes)
        }
    }
}

struct TimeUuidVisitor;

impl<'de> Visitor<'de> for TimeUuidVisitor {
    type Value = TimeUuid;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a hyphenated uuid string or 16 raw bytes")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<TimeUuid, E> {
        TimeUuid::parse(v).map_err(E::custom)
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<TimeUuid, E> {
        let bytes: [u8; 16] = v
            .try_into()
            .map_err(|_| E::custom(format!("expected 16 bytes, got {}", v.len())))?;
        Ok(TimeUuid::from_bytes(bytes))
    }

    fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<TimeUuid, A::Error> {
        let mut bytes = [0u8; 16];
        for (i, slot) in bytes.iter_mut().enumerate() {
            *slot = seq
                .next_element()?
                .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
        }
        Ok(TimeUuid::from_bytes(bytes))
    }
}

impl<'de> Deserialize<'de> for TimeUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(TimeUuidVisitor)
        } else {
            deserializer.deserialize_bytes(TimeUuidVisitor)
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Clock helpers
// ------------------------------------------------------------------------------------------------

/// Current wall-clock time in ticks since the UNIX epoch.
pub fn now_ticks() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch");
    elapsed.as_secs() * TICKS_PER_SECOND + u64::from(elapsed.subsec_nanos()) / 100
}

/// Converts whole seconds to ticks.
pub fn seconds_to_ticks(seconds: u64) -> u64 {
    seconds * TICKS_PER_SECOND
}
