// Multiview Layout Store
// Persists reusable multiview layout templates, global or scoped to a
// single production

use std::path::PathBuf;

use crate::models::MultiviewLayoutTemplate;
use crate::services::production_store::validate_document_id;

/// Manages multiview layout template storage. Templates without a
/// `production_id` are global presets visible to every production.
pub struct LayoutStore {
    layouts_dir: PathBuf,
}

impl LayoutStore {
    /// Create a new LayoutStore under the given app data directory
    pub fn new(app_data_dir: PathBuf) -> Self {
        let layouts_dir = app_data_dir.join("layouts");
        std::fs::create_dir_all(&layouts_dir).ok();
        Self { layouts_dir }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.layouts_dir.join(format!("{id}.json"))
    }

    /// List all templates visible to a production: global ones plus the
    /// production's own
    pub fn list_for_production(
        &self,
        production_id: &str,
    ) -> Result<Vec<MultiviewLayoutTemplate>, String> {
        let mut layouts: Vec<MultiviewLayoutTemplate> = self
            .list_all()?
            .into_iter()
            .filter(|layout| layout.visible_to(production_id))
            .collect();
        layouts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(layouts)
    }

    /// List every stored template
    pub fn list_all(&self) -> Result<Vec<MultiviewLayoutTemplate>, String> {
        let mut layouts = Vec::new();

        let entries = std::fs::read_dir(&self.layouts_dir).map_err(|e| e.to_string())?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    log::warn!("Skipping unreadable layout {}: {e}", path.display());
                    continue;
                }
            };
            match serde_json::from_str(&content) {
                Ok(layout) => layouts.push(layout),
                Err(e) => log::warn!("Skipping invalid layout {}: {e}", path.display()),
            }
        }

        Ok(layouts)
    }

    /// Load a template by id
    pub fn load(&self, id: &str) -> Result<MultiviewLayoutTemplate, String> {
        validate_document_id(id)?;

        let path = self.path_for(id);
        if !path.exists() {
            return Err(format!("Layout '{id}' not found"));
        }

        let content =
            std::fs::read_to_string(&path).map_err(|e| format!("Failed to read layout: {e}"))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse layout: {e}"))
    }

    /// Save a template. A layout needs a name before it can be kept.
    pub fn save(&self, layout: &MultiviewLayoutTemplate) -> Result<(), String> {
        if layout.name.trim().is_empty() {
            return Err("Layout name missing".to_string());
        }
        validate_document_id(&layout.id)?;

        let content = serde_json::to_string_pretty(layout)
            .map_err(|e| format!("Failed to serialize layout: {e}"))?;

        let path = self.path_for(&layout.id);
        let tmp = self.layouts_dir.join(format!("{}.json.tmp", layout.id));
        std::fs::write(&tmp, content).map_err(|e| format!("Failed to write layout: {e}"))?;
        std::fs::rename(&tmp, &path).map_err(|e| format!("Failed to replace layout: {e}"))?;

        log::info!("Layout saved: {} ({})", layout.name, layout.id);
        Ok(())
    }

    /// Delete a production-scoped template.
    ///
    /// Global presets are shared and cannot be deleted from a
    /// production; scoped templates are only deletable from their own
    /// production, and never while a saved multiview still references
    /// them.
    pub fn delete(
        &self,
        id: &str,
        production_id: &str,
        saved_multiview_ids: &[String],
    ) -> Result<(), String> {
        let layout = self.load(id)?;

        match &layout.production_id {
            None => return Err("Global layouts cannot be deleted from a production".to_string()),
            Some(owner) if owner != production_id => {
                return Err("Layout belongs to another production".to_string())
            }
            Some(_) => {}
        }

        if saved_multiview_ids.iter().any(|saved| saved == id) {
            return Err("Layout is referenced by a saved multiview".to_string());
        }

        std::fs::remove_file(self.path_for(id)).map_err(|e| format!("Failed to delete layout: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MultiviewLayout, MultiviewOutput};
    use tempfile::tempdir;

    fn template(id: &str, production_id: Option<&str>) -> MultiviewLayoutTemplate {
        MultiviewLayoutTemplate {
            id: id.to_string(),
            name: format!("Layout {id}"),
            production_id: production_id.map(|s| s.to_string()),
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
                srt_passphrase: None,
                srt_stream_id: None,
            },
        }
    }

    #[test]
    fn test_visibility_scoping() {
        let dir = tempdir().unwrap();
        let store = LayoutStore::new(dir.path().to_path_buf());

        store.save(&template("global", None)).unwrap();
        store.save(&template("mine", Some("prod-1"))).unwrap();
        store.save(&template("theirs", Some("prod-2"))).unwrap();

        let visible = store.list_for_production("prod-1").unwrap();
        let ids: Vec<&str> = visible.iter().map(|l| l.id.as_str()).collect();
        assert!(ids.contains(&"global"));
        assert!(ids.contains(&"mine"));
        assert!(!ids.contains(&"theirs"));
    }

    #[test]
    fn test_delete_guards() {
        let dir = tempdir().unwrap();
        let store = LayoutStore::new(dir.path().to_path_buf());

        store.save(&template("global", None)).unwrap();
        store.save(&template("mine", Some("prod-1"))).unwrap();
        store.save(&template("theirs", Some("prod-2"))).unwrap();

        // global presets are shared
        assert!(store.delete("global", "prod-1", &[]).is_err());
        // other production's layout
        assert!(store.delete("theirs", "prod-1", &[]).is_err());
        // referenced by a saved multiview
        assert!(store
            .delete("mine", "prod-1", &["mine".to_string()])
            .is_err());
        // free to go
        assert!(store.delete("mine", "prod-1", &[]).is_ok());
        assert!(store.load("mine").is_err());
    }

    #[test]
    fn test_unnamed_layout_rejected() {
        let dir = tempdir().unwrap();
        let store = LayoutStore::new(dir.path().to_path_buf());
        let mut layout = template("x", None);
        layout.name = "  ".to_string();
        assert!(store.save(&layout).is_err());
    }
}
