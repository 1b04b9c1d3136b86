//! Durable storage for the show's long-lived fields.
//!
//! Only competitors, entries and the bracket survive a restart. Writes are
//! whole-document replacements performed by a background task: the caller
//! hands over a snapshot and returns immediately. A backlog is coalesced to
//! its newest document, and a failed write is logged and never blocks the
//! next one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::PersistError;
use super::show_state::{BracketNode, Competitor, Entry, ShowState};

/// Document written to `<storage>/state.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DurableDocument {
    pub competitors: BTreeMap<String, Competitor>,
    pub entries: BTreeMap<String, Entry>,
    pub bracket: Option<BracketNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<String>,
}

impl DurableDocument {
    pub fn from_state(state: &ShowState) -> Self {
        Self {
            competitors: state.competitors.clone(),
            entries: state.entries.clone(),
            bracket: state.bracket.clone(),
            saved_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn merge_into(self, state: &mut ShowState) {
        state.competitors = self.competitors;
        state.entries = self.entries;
        state.bracket = self.bracket;
    }
}

/// Handle to the background writer.
pub struct Persistence {
    path: PathBuf,
    tx: mpsc::UnboundedSender<DurableDocument>,
}

impl Persistence {
    /// Spawn the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DurableDocument>();
        let task_path = path.clone();

        tokio::spawn(async move {
            while let Some(mut doc) = rx.recv().await {
                while let Ok(newer) = rx.try_recv() {
                    doc = newer;
                }
                match write_document(&task_path, &doc).await {
                    Ok(()) => log::debug!("Saved durable state to {}", task_path.display()),
                    Err(e) => log::error!("State saving failed ({}): {}", task_path.display(), e),
                }
            }
        });

        Self { path, tx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a write of `state`'s durable fields. Never blocks.
    pub fn save(&self, state: &ShowState) {
        if self.tx.send(DurableDocument::from_state(state)).is_err() {
            log::error!("State writer has stopped; dropping save");
        }
    }
}

/// Read the durable document, `Ok(None)` if it has never been written.
pub fn read_document(path: &Path) -> Result<Option<DurableDocument>, PersistError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&text)?))
}

/// Startup state: defaults overlaid with whatever durable fields were saved.
pub fn load_state(path: &Path) -> ShowState {
    let mut state = ShowState::default();
    match read_document(path) {
        Ok(Some(doc)) => {
            log::info!(
                "Loaded {} competitors and {} entries from {}",
                doc.competitors.len(),
                doc.entries.len(),
                path.display()
            );
            doc.merge_into(&mut state);
        }
        Ok(None) => log::info!("No saved state at {}, starting fresh", path.display()),
        Err(e) => log::warn!("Ignoring unreadable saved state at {}: {}", path.display(), e),
    }
    state
}

async fn write_document(path: &Path, doc: &DurableDocument) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_string_pretty(doc)?;
    // Write then rename so a crash never leaves a half-written document.
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn competitor(name: &str, score: u32) -> Competitor {
        Competitor {
            name: name.to_string(),
            image_url: String::new(),
            score,
        }
    }

    async fn wait_for_document(path: &Path) -> DurableDocument {
        for _ in 0..200 {
            if let Ok(Some(doc)) = read_document(path) {
                return doc;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("document never written to {}", path.display());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let state = load_state(&dir.path().join("storage").join("state.json"));
        assert_eq!(state, ShowState::default());
    }

    #[test]
    fn corrupt_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(read_document(&path).is_err());
        assert_eq!(load_state(&path), ShowState::default());
    }

    #[tokio::test]
    async fn save_writes_only_durable_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage").join("state.json");
        let persistence = Persistence::spawn(path.clone());

        let mut state = ShowState::default();
        state.competitors.insert("c1".into(), competitor("Ada", 3));
        state.embedded_frame_url = "https://example.com".into();
        persistence.save(&state);

        let doc = wait_for_document(&path).await;
        assert_eq!(doc.competitors["c1"].score, 3);
        assert!(doc.saved_at.is_some());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("embeddedFrameURL").is_none());
        assert!(raw.get("activeVote").is_none());

        let reloaded = load_state(&path);
        assert_eq!(reloaded.competitors, state.competitors);
        assert_eq!(reloaded.embedded_frame_url, "");
    }

    #[tokio::test]
    async fn later_save_replaces_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let persistence = Persistence::spawn(path.clone());

        let mut state = ShowState::default();
        for score in 0..5 {
            state.competitors.insert("c1".into(), competitor("Ada", score));
            persistence.save(&state);
        }

        for _ in 0..200 {
            if let Ok(Some(doc)) = read_document(&path) {
                if doc.competitors["c1"].score == 4 {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("final document never observed");
    }

    #[tokio::test]
    async fn failed_write_does_not_block_the_next() {
        let dir = tempdir().unwrap();
        let storage = dir.path().join("storage");
        let path = storage.join("state.json");
        // A plain file where the directory belongs makes create_dir_all fail.
        std::fs::write(&storage, "in the way").unwrap();
        let persistence = Persistence::spawn(path.clone());

        let mut state = ShowState::default();
        state.competitors.insert("c1".into(), competitor("Ada", 1));
        persistence.save(&state);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(read_document(&path).is_err() || !path.exists());

        std::fs::remove_file(&storage).unwrap();
        state.competitors.insert("c1".into(), competitor("Ada", 2));
        persistence.save(&state);

        let doc = wait_for_document(&path).await;
        assert_eq!(doc.competitors["c1"].score, 2);
    }
}
