// Production Store
// Persists production documents as JSON files in the app data directory

use std::path::PathBuf;

use crate::models::{Production, ProductionSummary};
use crate::services::encryption::Encryption;

/// Validate a document id to prevent path traversal attacks
pub fn validate_document_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("Document id cannot be empty".to_string());
    }
    if id.contains('/') || id.contains('\\') {
        return Err("Document id cannot contain path separators".to_string());
    }
    if id.contains("..") {
        return Err("Document id cannot contain '..'".to_string());
    }
    if !id.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err("Document id can only contain letters, numbers, underscores, and hyphens"
            .to_string());
    }
    if id.len() > 64 {
        return Err("Document id too long (max 64 characters)".to_string());
    }
    Ok(())
}

/// Manages production document storage and retrieval. Documents are
/// whole-file replace on save; concurrent editors race with
/// last-writer-wins, same as the original document store.
pub struct ProductionStore {
    productions_dir: PathBuf,
    app_data_dir: PathBuf,
}

impl ProductionStore {
    /// Create a new ProductionStore under the given app data directory
    pub fn new(app_data_dir: PathBuf) -> Self {
        let productions_dir = app_data_dir.join("productions");
        std::fs::create_dir_all(&productions_dir).ok();
        Self {
            productions_dir,
            app_data_dir,
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.productions_dir.join(format!("{id}.json"))
    }

    /// Get all production ids in the store
    pub fn get_all_ids(&self) -> Result<Vec<String>, String> {
        let mut ids = Vec::new();

        let entries = std::fs::read_dir(&self.productions_dir).map_err(|e| e.to_string())?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(id) = path.file_stem() {
                    ids.push(id.to_string_lossy().to_string());
                }
            }
        }

        Ok(ids)
    }

    /// Get summaries of all productions for list display
    pub fn get_all_summaries(&self) -> Result<Vec<ProductionSummary>, String> {
        let mut summaries = Vec::new();
        for id in self.get_all_ids()? {
            match self.load(&id) {
                Ok(production) => summaries.push(production.to_summary()),
                Err(e) => log::warn!("Skipping unreadable production {id}: {e}"),
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// Load a production by id, decrypting stored secrets
    pub fn load(&self, id: &str) -> Result<Production, String> {
        validate_document_id(id)?;

        let path = self.path_for(id);
        if !path.exists() {
            return Err(format!("Production '{id}' not found"));
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read production: {e}"))?;
        let mut production: Production =
            serde_json::from_str(&content).map_err(|e| format!("Failed to parse production: {e}"))?;

        self.decrypt_passphrases(&mut production)?;
        Ok(production)
    }

    /// Save a production, encrypting SRT passphrases at rest. The write
    /// goes through a temp file and rename so a crash mid-write never
    /// leaves a torn document.
    pub fn save(&self, production: &Production) -> Result<(), String> {
        validate_document_id(&production.id)?;

        let mut to_save = production.clone();
        self.encrypt_passphrases(&mut to_save)?;

        let content = serde_json::to_string_pretty(&to_save)
            .map_err(|e| format!("Failed to serialize production: {e}"))?;

        let path = self.path_for(&production.id);
        let tmp = self.productions_dir.join(format!("{}.json.tmp", production.id));

        std::fs::write(&tmp, content).map_err(|e| format!("Failed to write production: {e}"))?;
        std::fs::rename(&tmp, &path).map_err(|e| format!("Failed to replace production: {e}"))?;

        log::info!("Production saved: {} ({})", production.name, production.id);
        Ok(())
    }

    /// Delete a production by id
    pub fn delete(&self, id: &str) -> Result<(), String> {
        log::info!("Deleting production: {id}");
        validate_document_id(id)?;

        let path = self.path_for(id);
        if !path.exists() {
            log::warn!("Production not found for deletion: {id}");
            return Err(format!("Production '{id}' not found"));
        }

        std::fs::remove_file(&path).map_err(|e| format!("Failed to delete production: {e}"))
    }

    /// Mark every stored production inactive. Runs at server boot: the
    /// manager cannot have outlived its view of the running backend.
    pub fn mark_all_inactive(&self) -> Result<usize, String> {
        let mut count = 0;
        for id in self.get_all_ids()? {
            let mut production = match self.load(&id) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("Skipping production {id}: {e}");
                    continue;
                }
            };
            if production.is_active {
                production.is_active = false;
                self.save(&production)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Set the alignment override for one source on one pipeline.
    /// Matched by pipeline id + backend source id; reports "not found"
    /// when no element matches, like an unmatched array-filter update.
    pub fn set_pipeline_source_alignment(
        &self,
        production_id: &str,
        pipeline_id: &str,
        source_id: u32,
        alignment_ms: u32,
    ) -> Result<(), String> {
        self.update_pipeline_source(production_id, pipeline_id, source_id, |settings| {
            settings.alignment_ms = alignment_ms;
        })
    }

    /// Set the network latency override for one source on one pipeline
    pub fn set_pipeline_source_latency(
        &self,
        production_id: &str,
        pipeline_id: &str,
        source_id: u32,
        max_network_latency_ms: u32,
    ) -> Result<(), String> {
        self.update_pipeline_source(production_id, pipeline_id, source_id, |settings| {
            settings.max_network_latency_ms = max_network_latency_ms;
        })
    }

    fn update_pipeline_source<F>(
        &self,
        production_id: &str,
        pipeline_id: &str,
        source_id: u32,
        apply: F,
    ) -> Result<(), String>
    where
        F: FnOnce(&mut crate::models::PipelineSourceSettings),
    {
        let mut production = self.load(production_id)?;

        let settings = production
            .pipelines
            .iter_mut()
            .filter(|p| p.pipeline_id.as_deref() == Some(pipeline_id))
            .flat_map(|p| p.sources.iter_mut())
            .find(|s| s.source_id == source_id)
            .map(|s| &mut s.settings);

        match settings {
            Some(settings) => {
                apply(settings);
                self.save(&production)
            }
            None => Err("No matching pipeline source found to update".to_string()),
        }
    }

    /// Replace the stream UUIDs of a source reference, used after a
    /// stream restart re-provisions the source under new identities
    pub fn replace_source_stream_uuids(
        &self,
        production_id: &str,
        source_ref_id: &str,
        new_stream_uuids: Vec<String>,
    ) -> Result<(), String> {
        let mut production = self.load(production_id)?;

        let matched = production.sources.iter_mut().find_map(|source| match source {
            crate::models::SourceReference::IngestSource(s) if s.id == source_ref_id => Some(s),
            _ => None,
        });

        match matched {
            Some(source) => {
                source.stream_uuids = Some(new_stream_uuids);
                self.save(&production)
            }
            None => Err(format!("No ingest source '{source_ref_id}' in production")),
        }
    }

    fn encrypt_passphrases(&self, production: &mut Production) -> Result<(), String> {
        for multiview in &mut production.multiviews {
            if let Some(passphrase) = &multiview.output.srt_passphrase {
                if !passphrase.is_empty() && !Encryption::is_encrypted(passphrase) {
                    multiview.output.srt_passphrase =
                        Some(Encryption::encrypt_secret(passphrase, &self.app_data_dir)?);
                }
            }
        }
        Ok(())
    }

    fn decrypt_passphrases(&self, production: &mut Production) -> Result<(), String> {
        for multiview in &mut production.multiviews {
            if let Some(passphrase) = &multiview.output.srt_passphrase {
                if Encryption::is_encrypted(passphrase) {
                    multiview.output.srt_passphrase =
                        Some(Encryption::decrypt_secret(passphrase, &self.app_data_dir)?);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        IngestSourceRef, MultiviewLayout, MultiviewOutput, MultiviewSettings, PipelineSettings,
        PipelineSource, PipelineSourceSettings, SourceReference,
    };
    use tempfile::tempdir;

    fn make_production(id: &str) -> Production {
        Production {
            id: id.to_string(),
            name: "Morning show".to_string(),
            is_active: false,
            sources: vec![SourceReference::IngestSource(IngestSourceRef {
                id: "src-1".to_string(),
                label: "Cam1".to_string(),
                input_slot: 1,
                stream_uuids: Some(vec!["uuid-a".to_string()]),
            })],
            pipelines: vec![PipelineSettings {
                pipeline_id: Some("pipe-1".to_string()),
                pipeline_name: "HD pipeline".to_string(),
                alignment_ms: 1000,
                max_network_latency_ms: 250,
                sources: vec![PipelineSource {
                    source_id: 7,
                    settings: PipelineSourceSettings {
                        alignment_ms: 1000,
                        max_network_latency_ms: 250,
                    },
                }],
            }],
            outputs: Vec::new(),
            multiviews: vec![MultiviewSettings {
                id: None,
                multiview_id: Some(1),
                name: "Wall".to_string(),
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
                    local_port: 9900,
                    remote_ip: None,
                    remote_port: None,
                    srt_mode: "listener".to_string(),
                    srt_latency_ms: 120,
                    srt_passphrase: Some("topsecret".to_string()),
                    srt_stream_id: None,
                },
            }],
            control_connection: Default::default(),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = ProductionStore::new(dir.path().to_path_buf());

        let production = make_production("prod-1");
        store.save(&production).unwrap();

        let loaded = store.load("prod-1").unwrap();
        assert_eq!(loaded, production);
    }

    #[test]
    fn test_passphrase_encrypted_on_disk() {
        let dir = tempdir().unwrap();
        let store = ProductionStore::new(dir.path().to_path_buf());
        store.save(&make_production("prod-1")).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("productions/prod-1.json")).unwrap();
        assert!(!raw.contains("topsecret"));
        assert!(raw.contains("ENC::"));
    }

    #[test]
    fn test_alignment_update_matches_by_pipeline_and_source() {
        let dir = tempdir().unwrap();
        let store = ProductionStore::new(dir.path().to_path_buf());
        store.save(&make_production("prod-1")).unwrap();

        store
            .set_pipeline_source_alignment("prod-1", "pipe-1", 7, 2500)
            .unwrap();

        let loaded = store.load("prod-1").unwrap();
        assert_eq!(loaded.pipelines[0].sources[0].settings.alignment_ms, 2500);
        // latency untouched
        assert_eq!(
            loaded.pipelines[0].sources[0].settings.max_network_latency_ms,
            250
        );
    }

    #[test]
    fn test_unmatched_update_reports_not_found() {
        let dir = tempdir().unwrap();
        let store = ProductionStore::new(dir.path().to_path_buf());
        store.save(&make_production("prod-1")).unwrap();

        let err = store
            .set_pipeline_source_alignment("prod-1", "pipe-1", 99, 2500)
            .unwrap_err();
        assert!(err.contains("No matching pipeline source"));

        let err = store
            .set_pipeline_source_latency("prod-1", "other-pipe", 7, 100)
            .unwrap_err();
        assert!(err.contains("No matching pipeline source"));
    }

    #[test]
    fn test_replace_stream_uuids() {
        let dir = tempdir().unwrap();
        let store = ProductionStore::new(dir.path().to_path_buf());
        store.save(&make_production("prod-1")).unwrap();

        store
            .replace_source_stream_uuids(
                "prod-1",
                "src-1",
                vec!["uuid-x".to_string(), "uuid-y".to_string()],
            )
            .unwrap();

        let loaded = store.load("prod-1").unwrap();
        assert_eq!(
            loaded.sources[0].stream_uuids().unwrap().to_vec(),
            vec!["uuid-x".to_string(), "uuid-y".to_string()]
        );
    }

    #[test]
    fn test_mark_all_inactive() {
        let dir = tempdir().unwrap();
        let store = ProductionStore::new(dir.path().to_path_buf());

        let mut production = make_production("prod-1");
        production.is_active = true;
        store.save(&production).unwrap();
        store.save(&make_production("prod-2")).unwrap();

        let count = store.mark_all_inactive().unwrap();
        assert_eq!(count, 1);
        assert!(!store.load("prod-1").unwrap().is_active);
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let dir = tempdir().unwrap();
        let store = ProductionStore::new(dir.path().to_path_buf());
        assert!(store.load("../escape").is_err());
        assert!(store.load("").is_err());
        assert!(store.delete("a/b").is_err());
    }
}
