//! Reference-clock handshake file.
//!
//! Two lines: the local session's reference clock (ISO-8601) and the local
//! object identifier. The sampler writes it at session creation, the
//! remote merge reads it for every inbound message. Writes are atomic
//! (temp file + rename) so the merge never observes a torn record.

use chrono::NaiveDateTime;
use std::fs;
use std::path::Path;

use skytrace_core::clock::parse_ref_time;
use skytrace_core::ids::ObjectId;
use skytrace_core::REF_TIME_FORMAT;

use crate::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceRecord {
    pub ref_time: NaiveDateTime,
    pub object_id: ObjectId,
}

impl ReferenceRecord {
    pub fn new(ref_time: NaiveDateTime, object_id: ObjectId) -> Self {
        Self {
            ref_time,
            object_id,
        }
    }

    /// Write the record with replace-on-write atomicity.
    pub fn write(&self, path: &Path) -> Result<(), ServerError> {
        let contents = format!(
            "{}\n{}",
            self.ref_time.format(REF_TIME_FORMAT),
            self.object_id
        );
        let tmp = path.with_extension("txt.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read the record back; malformed contents are an error, not a panic.
    pub fn read(path: &Path) -> Result<Self, ServerError> {
        let contents = fs::read_to_string(path)?;
        let mut lines = contents.lines();
        let ref_line = lines
            .next()
            .ok_or_else(|| ServerError::BadReferenceFile("empty file".to_string()))?;
        let id_line = lines
            .next()
            .ok_or_else(|| ServerError::BadReferenceFile("missing object id line".to_string()))?;

        Ok(Self {
            ref_time: parse_ref_time(ref_line)?,
            object_id: ObjectId::parse(id_line)?,
        })
    }
}
