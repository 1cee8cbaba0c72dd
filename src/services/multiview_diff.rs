// Multiview Diff
// Computes add/update/remove sets between a production's previous
// multiview set and a newly selected one

use crate::models::MultiviewSettings;

/// Result of diffing two multiview sets. The three sets are disjoint.
#[derive(Debug, Clone, Default)]
pub struct MultiviewDiff {
    /// Present in new, absent in old
    pub additions: Vec<MultiviewSettings>,
    /// Present in both but structurally different
    pub updates: Vec<MultiviewSettings>,
    /// Present in old, absent in new
    pub removals: Vec<MultiviewSettings>,
}

impl MultiviewDiff {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.updates.is_empty() && self.removals.is_empty()
    }
}

/// Diff two multiview sets.
///
/// Entries are matched by `multiview_id`, never by array position, since
/// array order is not stable across preset edits. New entries without a
/// backend id yet are additions by definition.
pub fn diff_multiviews(old: &[MultiviewSettings], new: &[MultiviewSettings]) -> MultiviewDiff {
    let mut diff = MultiviewDiff::default();

    for candidate in new {
        let previous = candidate
            .multiview_id
            .and_then(|id| old.iter().find(|m| m.multiview_id == Some(id)));
        match previous {
            None => diff.additions.push(candidate.clone()),
            Some(previous) => {
                if previous != candidate {
                    diff.updates.push(candidate.clone());
                }
            }
        }
    }

    for previous in old {
        let survives = previous
            .multiview_id
            .map(|id| new.iter().any(|m| m.multiview_id == Some(id)))
            .unwrap_or(false);
        if !survives {
            diff.removals.push(previous.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MultiviewLayout, MultiviewOutput};

    fn multiview(multiview_id: Option<u32>, name: &str, port: u16) -> MultiviewSettings {
        MultiviewSettings {
            id: None,
            multiview_id,
            name: name.to_string(),
            for_pipeline_idx: Some(0),
            layout: MultiviewLayout {
                output_width: 1920,
                output_height: 1080,
                views: Vec::new(),
            },
            output: MultiviewOutput {
                video_format: "AVC".to_string(),
                video_kilobit_rate: 5000,
                frame_rate_n: 50,
                frame_rate_d: 1,
                local_ip: "0.0.0.0".to_string(),
                local_port: port,
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
    fn test_addition_update_removal() {
        let old = vec![multiview(Some(1), "mv1", 9900), multiview(Some(2), "mv2", 9901)];
        let new = vec![
            multiview(Some(2), "mv2 renamed", 9901),
            multiview(Some(3), "mv3", 9902),
        ];

        let diff = diff_multiviews(&old, &new);

        assert_eq!(diff.additions.len(), 1);
        assert_eq!(diff.additions[0].multiview_id, Some(3));
        assert_eq!(diff.updates.len(), 1);
        assert_eq!(diff.updates[0].multiview_id, Some(2));
        assert_eq!(diff.removals.len(), 1);
        assert_eq!(diff.removals[0].multiview_id, Some(1));
    }

    #[test]
    fn test_identical_sets_diff_empty() {
        let old = vec![multiview(Some(1), "mv1", 9900)];
        let new = old.clone();
        assert!(diff_multiviews(&old, &new).is_empty());
    }

    #[test]
    fn test_order_does_not_matter() {
        let old = vec![multiview(Some(1), "a", 9900), multiview(Some(2), "b", 9901)];
        let new = vec![multiview(Some(2), "b", 9901), multiview(Some(1), "a", 9900)];
        assert!(diff_multiviews(&old, &new).is_empty());
    }

    #[test]
    fn test_new_entry_without_backend_id_is_addition() {
        let old = vec![multiview(Some(1), "a", 9900)];
        let new = vec![multiview(Some(1), "a", 9900), multiview(None, "fresh", 9902)];
        let diff = diff_multiviews(&old, &new);
        assert_eq!(diff.additions.len(), 1);
        assert_eq!(diff.additions[0].name, "fresh");
        assert!(diff.updates.is_empty());
        assert!(diff.removals.is_empty());
    }
}
