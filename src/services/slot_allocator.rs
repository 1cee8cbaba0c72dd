// Slot Allocator
// Computes the first unused input slot for a production's source list

use crate::models::SourceReference;

/// Return the smallest unused 1-based input slot.
///
/// Scans ascending up to the last entry's slot, so callers pass lists in
/// ascending slot order; gaps left by removed sources are refilled before
/// a new slot is appended at the end.
pub fn first_empty_slot(sources: &[SourceReference]) -> u32 {
    let fallback = sources.len() as u32 + 1;
    let last = match sources.last() {
        Some(source) => source.input_slot(),
        None => return fallback,
    };

    for slot in 1..=last {
        if !sources.iter().any(|source| source.input_slot() == slot) {
            return slot;
        }
    }

    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IngestSourceRef, SourceReference};

    fn make_sources(slots: &[u32]) -> Vec<SourceReference> {
        slots
            .iter()
            .map(|&slot| {
                SourceReference::IngestSource(IngestSourceRef {
                    id: format!("source_{slot}"),
                    label: format!("Source {slot}"),
                    input_slot: slot,
                    stream_uuids: None,
                })
            })
            .collect()
    }

    #[test]
    fn test_empty_list_starts_at_one() {
        assert_eq!(first_empty_slot(&[]), 1);
    }

    #[test]
    fn test_gap_is_filled_first() {
        let sources = make_sources(&[1, 2, 4]);
        assert_eq!(first_empty_slot(&sources), 3);
    }

    #[test]
    fn test_contiguous_list_appends() {
        let sources = make_sources(&[1, 2, 3]);
        assert_eq!(first_empty_slot(&sources), 4);
    }

    #[test]
    fn test_gap_at_front() {
        let sources = make_sources(&[2, 3]);
        assert_eq!(first_empty_slot(&sources), 1);
    }

    #[test]
    fn test_single_source() {
        let sources = make_sources(&[1]);
        assert_eq!(first_empty_slot(&sources), 2);
    }
}
