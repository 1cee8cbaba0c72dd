// Multiview Validation
// Local duplicate checks run before any backend call or persist

use std::collections::HashSet;

use crate::models::MultiviewSettings;

/// Find multiviews whose `(local_ip, local_port)` pair collides with
/// another multiview in the set. Returns the index of every offender,
/// first occurrences included, so the UI can flag both sides of a clash.
pub fn find_duplicate_ports(multiviews: &[MultiviewSettings]) -> Vec<usize> {
    let endpoints: Vec<String> = multiviews
        .iter()
        .map(|m| format!("{}:{}", m.output.local_ip, m.output.local_port))
        .collect();

    let mut duplicate_indexes = Vec::new();
    let mut seen = HashSet::new();

    for (index, endpoint) in endpoints.iter().enumerate() {
        if seen.contains(endpoint) {
            duplicate_indexes.push(index);
            let first_index = endpoints.iter().position(|e| e == endpoint).unwrap();
            if !duplicate_indexes.contains(&first_index) {
                duplicate_indexes.push(first_index);
            }
        } else {
            seen.insert(endpoint.clone());
        }
    }

    duplicate_indexes
}

/// Find multiviews sharing a non-empty `srt_stream_id`. Empty or missing
/// stream ids never count as duplicates.
pub fn find_duplicate_stream_ids(multiviews: &[MultiviewSettings]) -> Vec<usize> {
    let stream_ids: Vec<Option<&str>> = multiviews
        .iter()
        .map(|m| m.output.srt_stream_id.as_deref().filter(|id| !id.is_empty()))
        .collect();

    let mut duplicate_indexes = Vec::new();
    let mut seen = HashSet::new();

    for (index, stream_id) in stream_ids.iter().enumerate() {
        let stream_id = match stream_id {
            Some(id) => *id,
            None => continue,
        };

        if seen.contains(stream_id) {
            duplicate_indexes.push(index);
            let first_index = stream_ids
                .iter()
                .position(|candidate| *candidate == Some(stream_id))
                .unwrap();
            if !duplicate_indexes.contains(&first_index) {
                duplicate_indexes.push(first_index);
            }
        } else {
            seen.insert(stream_id);
        }
    }

    duplicate_indexes
}

/// Validate a multiview set before it is applied or persisted
pub fn validate_multiviews(multiviews: &[MultiviewSettings]) -> Result<(), String> {
    if multiviews.is_empty() {
        return Err("No multiview selected".to_string());
    }
    if !find_duplicate_ports(multiviews).is_empty() {
        return Err("Multiview outputs share a local ip/port".to_string());
    }
    if !find_duplicate_stream_ids(multiviews).is_empty() {
        return Err("Multiview outputs share an SRT stream id".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MultiviewLayout, MultiviewOutput};

    fn multiview(ip: &str, port: u16, stream_id: Option<&str>) -> MultiviewSettings {
        MultiviewSettings {
            id: None,
            multiview_id: None,
            name: "mv".to_string(),
            for_pipeline_idx: None,
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
                local_ip: ip.to_string(),
                local_port: port,
                remote_ip: None,
                remote_port: None,
                srt_mode: "listener".to_string(),
                srt_latency_ms: 120,
                srt_passphrase: None,
                srt_stream_id: stream_id.map(|s| s.to_string()),
            },
        }
    }

    #[test]
    fn test_duplicate_ports_flag_both_occurrences() {
        let multiviews = vec![
            multiview("0.0.0.0", 9000, None),
            multiview("0.0.0.0", 9000, None),
            multiview("0.0.0.0", 9001, None),
        ];

        let mut duplicates = find_duplicate_ports(&multiviews);
        duplicates.sort_unstable();
        assert_eq!(duplicates, vec![0, 1]);
    }

    #[test]
    fn test_same_port_different_ip_is_fine() {
        let multiviews = vec![
            multiview("10.0.0.1", 9000, None),
            multiview("10.0.0.2", 9000, None),
        ];
        assert!(find_duplicate_ports(&multiviews).is_empty());
    }

    #[test]
    fn test_duplicate_stream_ids() {
        let multiviews = vec![
            multiview("0.0.0.0", 9000, Some("feed")),
            multiview("0.0.0.0", 9001, Some("feed")),
            multiview("0.0.0.0", 9002, Some("other")),
        ];

        let mut duplicates = find_duplicate_stream_ids(&multiviews);
        duplicates.sort_unstable();
        assert_eq!(duplicates, vec![0, 1]);
    }

    #[test]
    fn test_empty_stream_ids_never_duplicate() {
        let multiviews = vec![
            multiview("0.0.0.0", 9000, Some("")),
            multiview("0.0.0.0", 9001, Some("")),
            multiview("0.0.0.0", 9002, None),
        ];
        assert!(find_duplicate_stream_ids(&multiviews).is_empty());
    }

    #[test]
    fn test_validate_rejects_empty_set() {
        assert!(validate_multiviews(&[]).is_err());
    }
}
