// Multiview View Synchronizer
// Recomputes multiview tile labels when a source changes and pushes the
// updated view arrays to the running backend

use std::sync::Arc;

use crate::models::{MultiviewSettings, MultiviewView, SourceReference, WorkflowStep};
use crate::services::live_client::{LiveApiClient, PipelineMultiview};

/// Label shown on a tile whose input slot has no source bound to it
pub fn default_view_label(input_slot: u32) -> String {
    format!("Input {input_slot}")
}

/// Compute the new view array for a multiview after `changed` was added or
/// renamed.
///
/// Views are partitioned into those bound to the changed slot and the
/// rest. The matching views take the changed source's label; the rest are
/// re-synchronized from the current source list, which repairs labels that
/// drifted when a different slot's source was renamed in the same batch.
/// The partition is total and disjoint: every input view appears exactly
/// once in the output.
pub fn relabel_views(
    views: &[MultiviewView],
    sources: &[SourceReference],
    changed: &SourceReference,
) -> Vec<MultiviewView> {
    let (matching, rest): (Vec<&MultiviewView>, Vec<&MultiviewView>) = views
        .iter()
        .partition(|view| view.input_slot == changed.input_slot());

    let rest_with_labels = rest.into_iter().map(|view| {
        let source_for_view = sources
            .iter()
            .find(|source| source.input_slot() == view.input_slot);
        match source_for_view {
            Some(source) => MultiviewView {
                label: source.label().to_string(),
                ..view.clone()
            },
            None => view.clone(),
        }
    });

    let matching_with_labels = matching.into_iter().map(|view| MultiviewView {
        label: changed.label().to_string(),
        ..view.clone()
    });

    rest_with_labels.chain(matching_with_labels).collect()
}

/// Compute the new view array after the source on `freed_slot` was
/// removed: views on the freed slot fall back to the neutral default
/// label, the rest are re-synchronized from the remaining sources.
pub fn clear_slot_views(
    views: &[MultiviewView],
    sources: &[SourceReference],
    freed_slot: u32,
) -> Vec<MultiviewView> {
    let (matching, rest): (Vec<&MultiviewView>, Vec<&MultiviewView>) = views
        .iter()
        .partition(|view| view.input_slot == freed_slot);

    let rest_with_labels = rest.into_iter().map(|view| {
        let source_for_view = sources
            .iter()
            .find(|source| source.input_slot() == view.input_slot);
        match source_for_view {
            Some(source) => MultiviewView {
                label: source.label().to_string(),
                ..view.clone()
            },
            None => view.clone(),
        }
    });

    let cleared = matching.into_iter().map(|view| MultiviewView {
        label: default_view_label(view.input_slot),
        ..view.clone()
    });

    rest_with_labels.chain(cleared).collect()
}

/// Whether any view in any of the given multiviews is bound to the slot
pub fn slot_is_placed(multiviews: &[MultiviewSettings], input_slot: u32) -> bool {
    multiviews
        .iter()
        .flat_map(|multiview| multiview.layout.views.iter())
        .any(|view| view.input_slot == input_slot)
}

/// Pushes recomputed view arrays to running multiviews
pub struct MultiviewSynchronizer {
    client: Arc<LiveApiClient>,
}

impl MultiviewSynchronizer {
    pub fn new(client: Arc<LiveApiClient>) -> Self {
        Self { client }
    }

    /// Push the relabeled views of one multiview to the backend.
    ///
    /// Returns Ok(false) when no view in the layout references the
    /// changed slot: not every physical input is placed on every
    /// multiviewer, so this is a successful no-op, not a failure.
    pub async fn push_source_update(
        &self,
        pipeline_id: &str,
        sources: &[SourceReference],
        changed: &SourceReference,
        multiview: &MultiviewSettings,
    ) -> Result<bool, WorkflowStep> {
        let multiview_id = match multiview.multiview_id {
            Some(id) => id,
            None => return Ok(false),
        };

        if !slot_is_placed(std::slice::from_ref(multiview), changed.input_slot()) {
            return Ok(false);
        }

        let views = relabel_views(&multiview.layout.views, sources, changed);
        self.client
            .update_multiview(pipeline_id, multiview_id, &views)
            .await
            .map_err(|e| WorkflowStep::failed("update_multiview", e.to_string()))?;
        Ok(true)
    }

    /// Push a source change to every configured multiview of a
    /// production. A failed push on one multiview does not stop the
    /// others; the first failure step is returned.
    pub async fn push_source_update_all(
        &self,
        pipeline_id: &str,
        sources: &[SourceReference],
        changed: &SourceReference,
        multiviews: &[MultiviewSettings],
    ) -> Result<(), WorkflowStep> {
        let mut first_failure = None;
        for multiview in multiviews {
            if let Err(step) = self
                .push_source_update(pipeline_id, sources, changed, multiview)
                .await
            {
                log::warn!(
                    "Multiview update failed for '{}': {:?}",
                    multiview.name,
                    step.message
                );
                first_failure.get_or_insert(step);
            }
        }
        match first_failure {
            Some(step) => Err(step),
            None => Ok(()),
        }
    }

    /// Re-synchronize the label of one slot on the multiviews actually
    /// running on the backend. Used by the rendering-engine flows, where
    /// the backend's current view arrays are the ground truth.
    ///
    /// `label` is the new label for the slot, or None to clear the slot
    /// back to its neutral default after a removal.
    pub async fn sync_running_views(
        &self,
        pipeline_id: &str,
        configured: &[MultiviewSettings],
        sources: &[SourceReference],
        input_slot: u32,
        label: Option<&str>,
    ) -> Result<(), WorkflowStep> {
        let running = self
            .client
            .get_multiviews(pipeline_id)
            .await
            .map_err(|e| WorkflowStep::failed("update_multiview", e.to_string()))?;

        let configured_ids: Vec<u32> = configured.iter().filter_map(|m| m.multiview_id).collect();
        let owned: Vec<&PipelineMultiview> = running
            .iter()
            .filter(|m| configured_ids.contains(&m.id))
            .collect();

        for multiview in owned {
            let has_slot = multiview
                .layout
                .views
                .iter()
                .any(|view| view.input_slot == input_slot);
            if !has_slot {
                log::info!(
                    "No view found for input slot {input_slot} on multiview {}; nothing to connect",
                    multiview.id
                );
                continue;
            }

            let views = match label {
                Some(label) => {
                    let changed = SourceReference::IngestSource(crate::models::IngestSourceRef {
                        id: String::new(),
                        label: label.to_string(),
                        input_slot,
                        stream_uuids: None,
                    });
                    relabel_views(&multiview.layout.views, sources, &changed)
                }
                None => clear_slot_views(&multiview.layout.views, sources, input_slot),
            };

            self.client
                .update_multiview(pipeline_id, multiview.id, &views)
                .await
                .map_err(|e| WorkflowStep::failed("update_multiview", e.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IngestSourceRef, MultiviewLayout, MultiviewOutput};

    fn ingest(id: &str, label: &str, slot: u32) -> SourceReference {
        SourceReference::IngestSource(IngestSourceRef {
            id: id.to_string(),
            label: label.to_string(),
            input_slot: slot,
            stream_uuids: None,
        })
    }

    fn view(slot: u32, label: &str) -> MultiviewView {
        MultiviewView {
            id: None,
            input_slot: slot,
            label: label.to_string(),
            x: 0,
            y: 0,
            width: 480,
            height: 270,
        }
    }

    fn multiview(views: Vec<MultiviewView>) -> MultiviewSettings {
        MultiviewSettings {
            id: None,
            multiview_id: Some(1),
            name: "Program monitor".to_string(),
            for_pipeline_idx: Some(0),
            layout: MultiviewLayout {
                output_width: 1920,
                output_height: 1080,
                views,
            },
            output: MultiviewOutput {
                video_format: "AVC".to_string(),
                video_kilobit_rate: 5000,
                frame_rate_n: 50,
                frame_rate_d: 1,
                local_ip: "0.0.0.0".to_string(),
                local_port: 9900,
                remote_ip: None,
                remote_port: None,
                srt_mode: "listener".to_string(),
                srt_latency_ms: 120,
                srt_passphrase: None,
                srt_stream_id: None,
            },
        }
    }

    #[test]
    fn test_matching_views_take_changed_label() {
        let views = vec![view(1, "Cam1"), view(2, "OldCam"), view(1001, "Program")];
        let sources = vec![ingest("a", "Cam1", 1), ingest("b", "NewCam", 2)];

        let updated = relabel_views(&views, &sources, &sources[1]);

        assert_eq!(updated.len(), views.len());
        let slot2 = updated.iter().find(|v| v.input_slot == 2).unwrap();
        assert_eq!(slot2.label, "NewCam");
        // untouched views keep their labels
        let slot1 = updated.iter().find(|v| v.input_slot == 1).unwrap();
        assert_eq!(slot1.label, "Cam1");
        let program = updated.iter().find(|v| v.input_slot == 1001).unwrap();
        assert_eq!(program.label, "Program");
    }

    #[test]
    fn test_relabel_is_idempotent() {
        let views = vec![view(1, "Cam1"), view(2, "OldCam")];
        let sources = vec![ingest("a", "Cam1", 1), ingest("b", "NewCam", 2)];

        let once = relabel_views(&views, &sources, &sources[1]);
        let twice = relabel_views(&once, &sources, &sources[1]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_partition_is_total_and_disjoint() {
        let views = vec![view(1, "A"), view(2, "B"), view(2, "B again"), view(3, "C")];
        let sources = vec![ingest("b", "B2", 2)];

        let updated = relabel_views(&views, &sources, &sources[0]);

        assert_eq!(updated.len(), views.len());
        assert_eq!(
            updated.iter().filter(|v| v.input_slot == 2).count(),
            2
        );
    }

    #[test]
    fn test_rest_resynced_from_sources() {
        // slot 1's source was renamed in the same batch; relabeling for
        // slot 2 must repair slot 1's drifted label too
        let views = vec![view(1, "Stale"), view(2, "B")];
        let sources = vec![ingest("a", "Fresh", 1), ingest("b", "B", 2)];

        let updated = relabel_views(&views, &sources, &sources[1]);
        let slot1 = updated.iter().find(|v| v.input_slot == 1).unwrap();
        assert_eq!(slot1.label, "Fresh");
    }

    #[test]
    fn test_clear_slot_uses_default_label() {
        let views = vec![view(1, "Cam1"), view(2, "Removed cam")];
        let sources = vec![ingest("a", "Cam1", 1)];

        let updated = clear_slot_views(&views, &sources, 2);
        let slot2 = updated.iter().find(|v| v.input_slot == 2).unwrap();
        assert_eq!(slot2.label, "Input 2");
        assert_eq!(updated.len(), views.len());
    }

    #[test]
    fn test_slot_is_placed() {
        let mv = multiview(vec![view(1, "A"), view(3, "C")]);
        let multiviews = vec![mv];
        assert!(slot_is_placed(&multiviews, 3));
        assert!(!slot_is_placed(&multiviews, 2));
    }
}
