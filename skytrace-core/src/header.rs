//! File preamble and session header rendering.
//!
//! The preamble is the first region of every recording and of every live
//! stream: file type, format version and the session's reference time.
//! The session header is a block of global-property lines carrying
//! recorder identity and the geographic reference corner.

use chrono::NaiveDateTime;

use crate::{ACMI_FILE_TYPE, ACMI_VERSION, REF_TIME_FORMAT};

/// Render the format preamble for a given reference clock.
pub fn format_preamble(reference_time: NaiveDateTime) -> String {
    format!(
        "FileType={}\nFileVersion={}\n0,ReferenceTime={}Z\n",
        ACMI_FILE_TYPE,
        ACMI_VERSION,
        reference_time.format(REF_TIME_FORMAT)
    )
}

/// One-time session metadata written near the top of a recording.
///
/// This is mutable singleton state, not an append log: writing it twice
/// replaces the previous block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionHeader {
    pub data_source: String,
    pub data_recorder: String,
    pub author: String,
    pub title: String,
    pub comments: String,
    pub reference_longitude: f64,
    pub reference_latitude: f64,
}

impl SessionHeader {
    /// Render as a block of global-property lines.
    pub fn render(&self) -> String {
        format!(
            "0,DataSource={}\n0,DataRecorder={}\n0,Author={}\n0,Title={}\n0,Comments={}\n0,ReferenceLongitude={}\n0,ReferenceLatitude={}\n",
            self.data_source,
            self.data_recorder,
            self.author,
            self.title,
            self.comments,
            self.reference_longitude,
            self.reference_latitude
        )
    }
}
