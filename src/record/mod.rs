//! # Record Module
//!
//! Tagged record variants flowing through every layer of the engine:
//!
//! - [`EventRecord`] — a client event: header id/time plus the full JSON
//!   payload mapping.
//! - [`DeleteRecord`] — a range tombstone: all events with
//!   `id ∈ [start_id, end_id]` written before it are logically removed.
//! - [`IndexRecord`] — internal to an SSTable: points at one compressed
//!   payload block.
//!
//! ## Design Invariants
//!
//! - Records order by `(id, type tag)`. The id comparison is the
//!   time-UUID temporal order, so a sorted record run is a time-sorted
//!   run. Equal ids are permitted only across *different* record types,
//!   and a tombstone (lowest tag) sorts before an event at the same id so
//!   forward merges always see the tombstone first.
//! - [`Record::marshal`] / [`Record::unmarshal`] are the single wire
//!   codec; block payloads and the memtable store hold marshalled bytes.
//!   Format evolution is versioned by the SSTable `version` metadata
//!   attribute, not in-band.
//! - `size()` is the **uncompressed size estimate** used by the SST
//!   writer's block heuristic: a fixed [`BASE_SIZE`] header budget plus a
//!   variant-specific addition. The writer and the estimator must use the
//!   same constants.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::timeuuid::TimeUuid;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Reserved payload field holding the server-assigned id.
pub const ID_FIELD: &str = "@id";

/// Reserved payload field holding the event timestamp in ticks.
pub const TIMESTAMP_FIELD: &str = "@time";

/// Fixed per-record header budget used by the block-size heuristic.
pub const BASE_SIZE: usize = 272;

/// Size addition for a [`DeleteRecord`]: its two ids.
const DELETE_EXTRA: usize = 158;

/// Size addition for an [`IndexRecord`]: offset, flag, and id.
const INDEX_EXTRA: usize = 133;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by record construction and marshalling.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Wire-format encode/decode failure.
    #[error("record codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Payload is not a JSON object or fails to (de)serialize.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// An event payload is missing a reserved field.
    #[error("event payload missing required field {0:?}")]
    MissingField(&'static str),

    /// The payload `@id` field is not a valid time-UUID.
    #[error("bad id in payload: {0}")]
    Id(#[from] crate::timeuuid::TimeUuidError),

    /// An event payload decoded to something other than a JSON object.
    #[error("event payload is not an object")]
    NotAnObject,
}

// ------------------------------------------------------------------------------------------------
// Record — tagged sum type
// ------------------------------------------------------------------------------------------------

/// A single record as stored in memtables and SSTable blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// A range tombstone.
    Delete(DeleteRecord),

    /// A client event.
    Event(EventRecord),

    /// An SSTable block-directory entry.
    Index(IndexRecord),
}

impl Record {
    /// Returns the header id of this record.
    ///
    /// For tombstones this is the range `start_id`.
    pub fn id(&self) -> TimeUuid {
        match self {
            Record::Delete(r) => r.start_id,
            Record::Event(r) => r.id,
            Record::Index(r) => r.start_id,
        }
    }

    /// Returns the embedded timestamp of the header id, in ticks.
    pub fn time(&self) -> u64 {
        self.id().timestamp()
    }

    /// Returns the greatest id this record speaks for.
    ///
    /// Events and index entries answer their own id; a tombstone answers
    /// its inclusive `end_id`. The SST writer tracks table/block `end_id`
    /// bounds with this.
    pub fn max_id(&self) -> TimeUuid {
        match self {
            Record::Delete(r) => r.end_id,
            _ => self.id(),
        }
    }

    /// Numeric variant tag, also the tie-break rank at equal ids.
    pub fn type_tag(&self) -> u8 {
        match self {
            Record::Delete(_) => 0,
            Record::Event(_) => 1,
            Record::Index(_) => 2,
        }
    }

    /// Total order over records: `(id, type tag)` ascending.
    pub fn cmp_order(&self, other: &Record) -> Ordering {
        (self.id(), self.type_tag()).cmp(&(other.id(), other.type_tag()))
    }

    /// Uncompressed size estimate in bytes for block accounting.
    pub fn size(&self) -> usize {
        match self {
            Record::Delete(_) => BASE_SIZE + DELETE_EXTRA,
            Record::Event(r) => BASE_SIZE + r.payload_bytes().len(),
            Record::Index(_) => BASE_SIZE + INDEX_EXTRA,
        }
    }

    /// Serializes into the opaque wire form.
    pub fn marshal(&self) -> Result<Vec<u8>, RecordError> {
        Ok(bincode::serialize(self)?)
    }

    /// Reconstructs a record from its wire form, variant preserved.
    pub fn unmarshal(bytes: &[u8]) -> Result<Record, RecordError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ------------------------------------------------------------------------------------------------
// EventRecord
// ------------------------------------------------------------------------------------------------

/// A client event: header id/time plus the JSON payload that carries them.
///
/// The payload is held as its canonical JSON encoding so that retrieval
/// can hand bytes straight back to the caller without a re-serialization
/// pass; typed access goes through [`EventRecord::field`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Server-assigned id, echoed by the payload `@id` field.
    pub id: TimeUuid,

    /// Event timestamp in ticks, echoed by the payload `@time` field.
    pub time: u64,

    /// Canonical JSON encoding of the event object.
    payload: Vec<u8>,
}

impl EventRecord {
    /// Builds an event record from a payload mapping.
    ///
    /// The mapping must already carry `@id` (a uuid string) and `@time`
    /// (a tick count); both are lifted into the header.
    pub fn from_payload(payload: Map<String, Value>) -> Result<Self, RecordError> {
        let id = payload
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .ok_or(RecordError::MissingField(ID_FIELD))?;
        let id = TimeUuid::parse(id)?;
        let time = payload
            .get(TIMESTAMP_FIELD)
            .and_then(Value::as_u64)
            .ok_or(RecordError::MissingField(TIMESTAMP_FIELD))?;
        let payload = serde_json::to_vec(&Value::Object(payload))?;
        Ok(Self { id, time, payload })
    }

    /// Returns the canonical JSON bytes of the event object.
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Decodes the payload back into a JSON mapping.
    pub fn payload(&self) -> Result<Map<String, Value>, RecordError> {
        match serde_json::from_slice(&self.payload)? {
            Value::Object(map) => Ok(map),
            _ => Err(RecordError::NotAnObject),
        }
    }

    /// Looks up a payload field, falling back to the header for the
    /// reserved `@id` / `@time` names.
    pub fn field(&self, name: &str) -> Result<Option<Value>, RecordError> {
        let map = self.payload()?;
        if let Some(value) = map.get(name) {
            return Ok(Some(value.clone()));
        }
        Ok(match name {
            ID_FIELD => Some(Value::String(self.id.to_string())),
            TIMESTAMP_FIELD => Some(Value::from(self.time)),
            _ => None,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// DeleteRecord
// ------------------------------------------------------------------------------------------------

/// A range tombstone covering `[start_id, end_id]` (both inclusive).
///
/// The header id of a tombstone **is** its `start_id`, which places it at
/// the head of the range it deletes in any sorted run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeleteRecord {
    /// Inclusive start of the deleted id range; doubles as the header id.
    pub start_id: TimeUuid,

    /// Inclusive end of the deleted id range.
    pub end_id: TimeUuid,
}

impl DeleteRecord {
    /// Creates a tombstone for the inclusive id range.
    pub fn new(start_id: TimeUuid, end_id: TimeUuid) -> Self {
        Self { start_id, end_id }
    }

    /// True when `id` falls inside the deleted range.
    pub fn covers(&self, id: &TimeUuid) -> bool {
        self.start_id <= *id && *id <= self.end_id
    }
}

// ------------------------------------------------------------------------------------------------
// IndexRecord
// ------------------------------------------------------------------------------------------------

/// Directory entry for one compressed block inside an SSTable payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Id of the first record in the block.
    pub start_id: TimeUuid,

    /// Byte offset of the block within the payload object.
    pub offset: u64,

    /// True when the block contains, or is covered by, a tombstone.
    pub has_delete: bool,
}

impl IndexRecord {
    /// Creates a block-directory entry.
    pub fn new(start_id: TimeUuid, offset: u64, has_delete: bool) -> Self {
        Self {
            start_id,
            offset,
            has_delete,
        }
    }
}
