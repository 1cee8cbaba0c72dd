// Setup Item Mutators
// Add/update/remove source references within a production's source list

use crate::models::SourceReference;
use crate::services::slot_allocator::first_empty_slot;

/// Append a new source reference. The caller-provided slot must come from
/// `first_empty_slot`; if it collides with an occupied slot the reference
/// is re-allocated to the current first gap instead.
pub fn add_setup_item(sources: &mut Vec<SourceReference>, mut source: SourceReference) {
    let occupied = sources
        .iter()
        .any(|existing| existing.input_slot() == source.input_slot());
    if occupied {
        let slot = first_empty_slot(sources);
        match &mut source {
            SourceReference::IngestSource(s) => s.input_slot = slot,
            SourceReference::Html(s) => s.input_slot = slot,
            SourceReference::Mediaplayer(s) => s.input_slot = slot,
        }
    }
    sources.push(source);
}

/// Replace the mutable fields of the reference with the given id. The
/// input slot is never changed by an update. An unknown id is a no-op;
/// callers that need to know check membership afterwards.
pub fn update_setup_item(sources: &mut [SourceReference], updated: &SourceReference) {
    for existing in sources.iter_mut() {
        if existing.id() == updated.id() {
            existing.set_label(updated.label());
            match (existing, updated) {
                (SourceReference::Html(current), SourceReference::Html(new)) => {
                    current.html_data = new.html_data.clone();
                }
                (SourceReference::Mediaplayer(current), SourceReference::Mediaplayer(new)) => {
                    current.media_data = new.media_data.clone();
                }
                _ => {}
            }
        }
    }
}

/// Remove the reference with the given id. Remaining slots are not
/// renumbered: slot numbers are stable identities, and the gap is filled
/// later by the allocator. An unknown id is a no-op.
pub fn remove_setup_item(sources: &mut Vec<SourceReference>, source_id: &str) {
    sources.retain(|existing| existing.id() != source_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HtmlData, HtmlSourceRef, IngestSourceRef, SourceReference};

    fn ingest(id: &str, label: &str, slot: u32) -> SourceReference {
        SourceReference::IngestSource(IngestSourceRef {
            id: id.to_string(),
            label: label.to_string(),
            input_slot: slot,
            stream_uuids: None,
        })
    }

    #[test]
    fn test_add_remove_add_fills_gap() {
        let mut sources = Vec::new();

        let slot = first_empty_slot(&sources);
        add_setup_item(&mut sources, ingest("a", "Cam1", slot));
        assert_eq!(sources[0].input_slot(), 1);

        let slot = first_empty_slot(&sources);
        add_setup_item(&mut sources, ingest("b", "Cam2", slot));
        assert_eq!(sources[1].input_slot(), 2);

        remove_setup_item(&mut sources, "a");
        assert_eq!(sources.len(), 1);
        // slot 2 keeps its identity, no renumbering
        assert_eq!(sources[0].input_slot(), 2);

        let slot = first_empty_slot(&sources);
        add_setup_item(&mut sources, ingest("c", "Cam3", slot));
        let cam3 = sources.iter().find(|s| s.id() == "c").unwrap();
        assert_eq!(cam3.input_slot(), 1);
    }

    #[test]
    fn test_add_reallocates_on_slot_collision() {
        let mut sources = vec![ingest("a", "Cam1", 1)];
        add_setup_item(&mut sources, ingest("b", "Cam2", 1));
        assert_eq!(sources[1].input_slot(), 2);
    }

    #[test]
    fn test_update_changes_label_not_slot() {
        let mut sources = vec![ingest("a", "OldCam", 3)];
        update_setup_item(&mut sources, &ingest("a", "NewCam", 99));
        assert_eq!(sources[0].label(), "NewCam");
        assert_eq!(sources[0].input_slot(), 3);
    }

    #[test]
    fn test_update_replaces_html_payload() {
        let mut sources = vec![SourceReference::Html(HtmlSourceRef {
            id: "h".to_string(),
            label: "HTML 1".to_string(),
            input_slot: 1,
            html_data: HtmlData {
                url: "http://old".to_string(),
                width: 1280,
                height: 720,
            },
        })];
        update_setup_item(
            &mut sources,
            &SourceReference::Html(HtmlSourceRef {
                id: "h".to_string(),
                label: "Scoreboard".to_string(),
                input_slot: 1,
                html_data: HtmlData {
                    url: "http://new".to_string(),
                    width: 1920,
                    height: 1080,
                },
            }),
        );
        match &sources[0] {
            SourceReference::Html(s) => {
                assert_eq!(s.label, "Scoreboard");
                assert_eq!(s.html_data.url, "http://new");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let mut sources = vec![ingest("a", "Cam1", 1)];
        update_setup_item(&mut sources, &ingest("missing", "Ghost", 1));
        remove_setup_item(&mut sources, "missing");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].label(), "Cam1");
    }
}
