// Pipeline Model
// One redundant processing path (encoder instance) within a production

use serde::{Deserialize, Serialize};

fn default_alignment_ms() -> u32 {
    1000
}

fn default_max_network_latency_ms() -> u32 {
    250
}

/// Settings for a single pipeline. Productions commonly run two in
/// parallel for redundancy; the same logical source must be provisioned
/// identically on each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Backend pipeline UUID, assigned when the pipeline exists remotely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    /// Display name (e.g. "HD pipeline")
    pub pipeline_name: String,
    /// Default frame alignment for sources without an override
    #[serde(default = "default_alignment_ms")]
    pub alignment_ms: u32,
    /// Default tolerated network latency for sources without an override
    #[serde(default = "default_max_network_latency_ms")]
    pub max_network_latency_ms: u32,
    /// Per-source overrides, keyed by the backend's numeric source id
    #[serde(default)]
    pub sources: Vec<PipelineSource>,
}

impl PipelineSettings {
    /// Look up the per-source settings entry for a backend source id
    pub fn source(&self, source_id: u32) -> Option<&PipelineSource> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }
}

/// Per-source settings override within a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSource {
    /// Backend numeric ingest source id
    pub source_id: u32,
    pub settings: PipelineSourceSettings,
}

/// Alignment/latency override values for one source on one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSourceSettings {
    pub alignment_ms: u32,
    pub max_network_latency_ms: u32,
}

/// A configured output on a pipeline (SRT/MPEG-TS egress)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
    pub local_ip: String,
    pub local_port: u16,
    pub srt_mode: String,
    pub video_format: String,
    pub video_kilobit_rate: u32,
}
