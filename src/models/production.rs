// Production Model
// Top-level configured/running live-video session

use serde::{Deserialize, Serialize};
use crate::models::{MultiviewSettings, OutputSettings, PipelineSettings, SourceReference};

/// A production: the aggregate root grouping sources, pipelines, outputs
/// and multiviewers. While `is_active` is false all edits are local; while
/// true they are additionally mirrored to the live backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Production {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "isActive", default)]
    pub is_active: bool,
    #[serde(default)]
    pub sources: Vec<SourceReference>,
    #[serde(default)]
    pub pipelines: Vec<PipelineSettings>,
    /// Outputs per pipeline, indexed like `pipelines`
    #[serde(default)]
    pub outputs: Vec<Vec<OutputSettings>>,
    #[serde(default)]
    pub multiviews: Vec<MultiviewSettings>,
    #[serde(default)]
    pub control_connection: ControlConnection,
}

impl Production {
    /// Get a source reference by its id
    pub fn source(&self, source_id: &str) -> Option<&SourceReference> {
        self.sources.iter().find(|s| s.id() == source_id)
    }

    /// The pipeline carrying the production's multiviews. Multiviews are
    /// rendered on the first pipeline with a backend identity.
    pub fn multiview_pipeline(&self) -> Option<&PipelineSettings> {
        self.pipelines.iter().find(|p| p.pipeline_id.is_some())
    }

    /// Generate a summary of this production for list display
    pub fn to_summary(&self) -> ProductionSummary {
        ProductionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            is_active: self.is_active,
            source_count: self.sources.len(),
            pipeline_count: self.pipelines.len(),
            multiview_count: self.multiviews.len(),
        }
    }
}

/// Control panel / router connection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlConnection {
    pub control_panel_endpoints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_panel_name: Option<String>,
}

/// Production summary for list display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    pub source_count: usize,
    pub pipeline_count: usize,
    pub multiview_count: usize,
}
