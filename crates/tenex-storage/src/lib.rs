// Filesystem Persistence Adapter (spec §4.3)
//
// Conversations live as one JSON file per id under a root directory:
// `<root>/conversations/active/<id>.json` while open, moved to
// `<root>/conversations/archive/<id>.json` once archived. This is the one
// concrete `PersistenceAdapter` the engine ships with; everything else
// (relay transport, signing, the LLM call) stays behind `tenex-core::traits`
// as external collaborators the host wires in separately.
//
// The teacher's storage crate is SQL-backed (sqlx against Postgres) — this
// crate deliberately does not follow that backend, since the spec mandates
// plain JSON files on disk. What it does keep from the teacher is the
// error-mapping and tracing idiom: wrap the underlying I/O error in the
// engine's own error type rather than leaking `std::io::Error` across the
// trait boundary.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tenex_contracts::Conversation;
use tenex_core::error::{EngineError, Result};
use tenex_core::traits::{ConversationMetadata, PersistenceAdapter, SearchCriteria};
use tracing::warn;

const ACTIVE_DIR: &str = "active";
const ARCHIVE_DIR: &str = "archive";

/// A `PersistenceAdapter` backed by one JSON file per conversation under
/// `<root>/conversations/{active,archive}/<id>.json`.
#[derive(Debug, Clone)]
pub struct FilesystemPersistenceAdapter {
    root: PathBuf,
}

impl FilesystemPersistenceAdapter {
    /// `root` is the directory that will hold the `conversations/` tree,
    /// e.g. the project's `.tenex` directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn active_dir(&self) -> PathBuf {
        self.root.join("conversations").join(ACTIVE_DIR)
    }

    fn archive_dir(&self) -> PathBuf {
        self.root.join("conversations").join(ARCHIVE_DIR)
    }

    fn active_path(&self, id: &str) -> PathBuf {
        self.active_dir().join(format!("{id}.json"))
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.archive_dir().join(format!("{id}.json"))
    }

    /// Writes `conversation` to `path` via a temp-file-then-rename so a
    /// crash mid-write never leaves a half-written conversation on disk.
    async fn write_atomic(path: &Path, conversation: &Conversation) -> Result<()> {
        let body = serde_json::to_vec_pretty(conversation)
            .map_err(|e| EngineError::persistence(e.to_string()))?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| EngineError::persistence(format!("writing {}: {e}", tmp_path.display())))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| EngineError::persistence(format!("renaming into {}: {e}", path.display())))?;
        Ok(())
    }

    /// Reads and parses every `*.json` file in `dir`. A file that fails to
    /// parse is logged and skipped rather than failing the whole scan
    /// (spec §4.3 — a single corrupt conversation must not take down the
    /// rest of the fleet).
    async fn read_all(dir: &Path) -> Result<Vec<Conversation>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::persistence(format!("reading {}: {e}", dir.display()))),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::persistence(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(body) => match serde_json::from_slice::<Conversation>(&body) {
                    Ok(conversation) => out.push(conversation),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt conversation file"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable conversation file"),
            }
        }
        Ok(out)
    }
}

fn to_metadata(conversation: &Conversation, archived: bool) -> ConversationMetadata {
    ConversationMetadata {
        id: conversation.id.clone(),
        title: conversation.title.clone(),
        phase: conversation.phase,
        phase_started_at: conversation.phase_started_at,
        event_count: conversation.event_count(),
        agent_count: conversation.agent_count(),
        archived,
    }
}

#[async_trait]
impl PersistenceAdapter for FilesystemPersistenceAdapter {
    async fn initialize(&self) -> Result<()> {
        for dir in [self.active_dir(), self.archive_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| EngineError::persistence(format!("creating {}: {e}", dir.display())))?;
        }
        Ok(())
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        Self::write_atomic(&self.active_path(&conversation.id), conversation).await
    }

    async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.active_path(id);
        match tokio::fs::read(&path).await {
            Ok(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| EngineError::persistence(format!("parsing {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::persistence(format!("reading {}: {e}", path.display()))),
        }
    }

    async fn list(&self) -> Result<Vec<ConversationMetadata>> {
        Ok(Self::read_all(&self.active_dir())
            .await?
            .iter()
            .map(|c| to_metadata(c, false))
            .collect())
    }

    async fn archive(&self, id: &str) -> Result<()> {
        let from = self.active_path(id);
        if tokio::fs::metadata(&from).await.is_err() {
            return Err(EngineError::conversation_not_found(id));
        }
        tokio::fs::create_dir_all(self.archive_dir())
            .await
            .map_err(|e| EngineError::persistence(e.to_string()))?;
        let to = self.archive_path(id);
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| EngineError::persistence(format!("archiving {id}: {e}")))?;
        Ok(())
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ConversationMetadata>> {
        let active = Self::read_all(&self.active_dir()).await?;
        let archived = Self::read_all(&self.archive_dir()).await?;
        let all = active
            .iter()
            .map(|c| to_metadata(c, false))
            .chain(archived.iter().map(|c| to_metadata(c, true)));
        Ok(all.filter(|meta| criteria.matches(meta)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn adapter(dir: &tempfile::TempDir) -> FilesystemPersistenceAdapter {
        FilesystemPersistenceAdapter::new(dir.path())
    }

    #[tokio::test]
    async fn initialize_creates_active_and_archive_dirs() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir);
        adapter.initialize().await.unwrap();
        assert!(dir.path().join("conversations").join("active").is_dir());
        assert!(dir.path().join("conversations").join("archive").is_dir());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir);
        adapter.initialize().await.unwrap();
        let conversation = Conversation::new("c1", "Title", Utc::now());
        adapter.save(&conversation).await.unwrap();
        let loaded = adapter.load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "c1");
        assert_eq!(loaded.title, "Title");
    }

    #[tokio::test]
    async fn load_missing_conversation_returns_none() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir);
        adapter.initialize().await.unwrap();
        assert!(adapter.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn archive_moves_file_out_of_active_set() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir);
        adapter.initialize().await.unwrap();
        let conversation = Conversation::new("c1", "Title", Utc::now());
        adapter.save(&conversation).await.unwrap();
        adapter.archive("c1").await.unwrap();
        assert!(adapter.load("c1").await.unwrap().is_none());
        assert!(dir.path().join("conversations").join("archive").join("c1.json").exists());
        assert_eq!(adapter.list().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn archiving_unknown_conversation_errors() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir);
        adapter.initialize().await.unwrap();
        assert!(adapter.archive("missing").await.is_err());
    }

    #[tokio::test]
    async fn list_skips_corrupt_files_without_failing() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir);
        adapter.initialize().await.unwrap();
        let conversation = Conversation::new("good", "Title", Utc::now());
        adapter.save(&conversation).await.unwrap();
        tokio::fs::write(
            dir.path().join("conversations").join("active").join("bad.json"),
            b"not json",
        )
        .await
        .unwrap();
        let listed = adapter.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "good");
    }

    #[tokio::test]
    async fn search_covers_both_active_and_archived() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir);
        adapter.initialize().await.unwrap();
        adapter.save(&Conversation::new("c1", "Alpha Project", Utc::now())).await.unwrap();
        adapter.save(&Conversation::new("c2", "Beta Project", Utc::now())).await.unwrap();
        adapter.archive("c1").await.unwrap();

        let archived_only = adapter
            .search(&SearchCriteria {
                title_contains: None,
                phase: None,
                archived: Some(true),
            })
            .await
            .unwrap();
        assert_eq!(archived_only.len(), 1);
        assert_eq!(archived_only[0].id, "c1");

        let by_title = adapter
            .search(&SearchCriteria {
                title_contains: Some("beta".to_string()),
                phase: None,
                archived: None,
            })
            .await
            .unwrap();
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].id, "c2");
    }
}
