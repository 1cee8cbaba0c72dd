// Log Manager Service
// Retention pruning and retrieval of server log files

use std::path::Path;
use std::time::{Duration, SystemTime};

/// Delete log files older than the retention window
pub fn prune_logs(log_dir: &Path, retention_days: u32) -> Result<usize, String> {
    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let mut pruned = 0;

    let entries = std::fs::read_dir(log_dir).map_err(|e| e.to_string())?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .map_err(|e| e.to_string())?;

        if modified < cutoff {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to prune log {}: {e}", path.display());
            } else {
                pruned += 1;
            }
        }
    }

    Ok(pruned)
}

/// Read the last `max_lines` lines of the server log
pub fn read_recent_logs(log_dir: &Path, max_lines: usize) -> Result<Vec<String>, String> {
    let log_path = log_dir.join("crossview-server.log");
    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content =
        std::fs::read_to_string(&log_path).map_err(|e| format!("Failed to read log: {e}"))?;

    let lines: Vec<String> = content.lines().map(|line| line.to_string()).collect();
    let start = lines.len().saturating_sub(max_lines);
    Ok(lines[start..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_recent_logs_tail() {
        let dir = tempdir().unwrap();
        let content: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("crossview-server.log"), content).unwrap();

        let lines = read_recent_logs(dir.path(), 3).unwrap();
        assert_eq!(lines, vec!["line 8", "line 9", "line 10"]);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        assert!(read_recent_logs(dir.path(), 100).unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_fresh_logs() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("crossview-server.log"), "fresh").unwrap();
        let pruned = prune_logs(dir.path(), 30).unwrap();
        assert_eq!(pruned, 0);
        assert!(dir.path().join("crossview-server.log").exists());
    }
}
