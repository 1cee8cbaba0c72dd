// Multiview Model
// Composited monitoring outputs showing sources in a tile grid

use serde::{Deserialize, Serialize};

/// Input slots at or above this value are feedback views (program/preview)
/// injected by the pipeline, never bound to a production source.
pub const FEEDBACK_SLOT_THRESHOLD: u32 = 1000;

/// A multiviewer configured on a production
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiviewSettings {
    /// Saved layout template this multiview was created from, if any
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Backend multiview id, assigned once created on a pipeline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiview_id: Option<u32>,
    pub name: String,
    /// Index of the pipeline carrying this multiview
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_pipeline_idx: Option<usize>,
    pub layout: MultiviewLayout,
    pub output: MultiviewOutput,
}

/// Tile arrangement of a multiview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiviewLayout {
    pub output_width: u32,
    pub output_height: u32,
    #[serde(default)]
    pub views: Vec<MultiviewView>,
}

/// One tile within a multiview grid, bound to an input slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiviewView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub input_slot: u32,
    pub label: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl MultiviewView {
    /// Whether this view shows a pipeline feedback feed (program/preview)
    /// rather than a production source
    pub fn is_feedback(&self) -> bool {
        self.input_slot >= FEEDBACK_SLOT_THRESHOLD
    }
}

/// SRT egress settings of a multiview output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiviewOutput {
    pub video_format: String,
    pub video_kilobit_rate: u32,
    pub frame_rate_n: u32,
    pub frame_rate_d: u32,
    pub local_ip: String,
    pub local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    /// "listener" or "caller"
    pub srt_mode: String,
    pub srt_latency_ms: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srt_passphrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srt_stream_id: Option<String>,
}
