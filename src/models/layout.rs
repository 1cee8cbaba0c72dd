// Multiview Layout Template Model
// Reusable multiview templates, global or scoped to one production

use serde::{Deserialize, Serialize};
use crate::models::{MultiviewLayout, MultiviewOutput};

/// A persisted multiview template. Templates without a `production_id`
/// are global and visible to every production; scoped templates belong
/// to a single production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiviewLayoutTemplate {
    /// Assigned by the store when a fresh template is saved
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production_id: Option<String>,
    pub layout: MultiviewLayout,
    pub output: MultiviewOutput,
}

impl MultiviewLayoutTemplate {
    /// Whether this template is visible from the given production
    pub fn visible_to(&self, production_id: &str) -> bool {
        match &self.production_id {
            None => true,
            Some(owner) => owner == production_id,
        }
    }
}
