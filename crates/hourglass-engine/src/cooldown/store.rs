//! Cooldown Storage
//!
//! Durable backends for cooldown state. The gate only calls these off the
//! invocation path: at startup, on reload, on shutdown and on explicit save.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::codec::PersistenceCodec;
use super::model::{ActionKey, ActorId, EngineSettings};
use super::table::TableSnapshot;

/// Storage trait for persisted cooldown state
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Read every entry still live at `now_ms`; missing state is empty
    async fn load(&self, now_ms: i64) -> anyhow::Result<TableSnapshot>;

    /// Replace the stored state with the live part of `snapshot`
    async fn save(&self, snapshot: &TableSnapshot, now_ms: i64) -> anyhow::Result<()>;

    /// Where the state lives, for log messages
    fn location(&self) -> String;
}

/// In-memory store; state does not survive the process
#[derive(Debug, Default)]
pub struct MemoryCooldownStore {
    entries: DashMap<ActorId, BTreeMap<ActionKey, i64>>,
}

impl MemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownStore for MemoryCooldownStore {
    async fn load(&self, now_ms: i64) -> anyhow::Result<TableSnapshot> {
        Ok(self
            .entries
            .iter()
            .filter_map(|slot| {
                let live: BTreeMap<ActionKey, i64> = slot
                    .value()
                    .iter()
                    .filter(|(_, expiry)| **expiry > now_ms)
                    .map(|(action, expiry)| (action.clone(), *expiry))
                    .collect();
                (!live.is_empty()).then(|| (*slot.key(), live))
            })
            .collect())
    }

    async fn save(&self, snapshot: &TableSnapshot, now_ms: i64) -> anyhow::Result<()> {
        self.entries.clear();
        for (actor, actions) in snapshot {
            let live: BTreeMap<ActionKey, i64> = actions
                .iter()
                .filter(|(_, expiry)| **expiry > now_ms)
                .map(|(action, expiry)| (action.clone(), *expiry))
                .collect();
            if !live.is_empty() {
                self.entries.insert(*actor, live);
            }
        }
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// File-backed store; the format follows the file extension
#[derive(Debug, Clone)]
pub struct FileCooldownStore {
    file_path: PathBuf,
    codec: PersistenceCodec,
}

impl FileCooldownStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let codec = PersistenceCodec::for_path(&file_path);
        Self { file_path, codec }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .file_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.file_path.with_file_name(name)
    }
}

#[async_trait]
impl CooldownStore for FileCooldownStore {
    async fn load(&self, now_ms: i64) -> anyhow::Result<TableSnapshot> {
        let bytes = match tokio::fs::read(&self.file_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(TableSnapshot::new());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(self.codec.decode(&bytes, now_ms)?)
    }

    async fn save(&self, snapshot: &TableSnapshot, now_ms: i64) -> anyhow::Result<()> {
        let content = self.codec.encode(snapshot, now_ms)?;

        if let Some(parent) = self.file_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never see a partial file
        let temp = self.temp_path();
        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &self.file_path).await?;
        Ok(())
    }

    fn location(&self) -> String {
        self.file_path.display().to_string()
    }
}

/// Create a cooldown store based on configuration
pub fn create_cooldown_store(settings: &EngineSettings) -> Arc<dyn CooldownStore> {
    if settings.persistent_cooldowns {
        Arc::new(FileCooldownStore::new(settings.data_file.clone()))
    } else {
        Arc::new(MemoryCooldownStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const NOW: i64 = 1_700_000_000_000;

    fn sample(actor: Uuid) -> TableSnapshot {
        let mut actions = BTreeMap::new();
        actions.insert(ActionKey::new("home"), NOW + 10_000);
        actions.insert(ActionKey::new("spawn"), NOW - 10);
        let mut snapshot = TableSnapshot::new();
        snapshot.insert(actor, actions);
        snapshot
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCooldownStore::new();
        let actor = Uuid::new_v4();

        store.save(&sample(actor), NOW).await.unwrap();
        let loaded = store.load(NOW).await.unwrap();
        assert_eq!(loaded[&actor].len(), 1);

        let later = store.load(NOW + 20_000).await.unwrap();
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCooldownStore::new(dir.path().join("absent.yml"));

        assert!(store.load(NOW).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("cooldowns.json");
        let store = FileCooldownStore::new(&path);
        let actor = Uuid::new_v4();

        store.save(&sample(actor), NOW).await.unwrap();
        assert!(path.exists());
        assert!(!store.temp_path().exists());

        let loaded = store.load(NOW).await.unwrap();
        assert_eq!(loaded[&actor][&ActionKey::new("home")], NOW + 10_000);
        assert!(!loaded[&actor].contains_key(&ActionKey::new("spawn")));
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cooldowns.yml");
        tokio::fs::write(&path, "cooldowns: [unterminated").await.unwrap();

        let store = FileCooldownStore::new(&path);
        assert!(store.load(NOW).await.is_err());
    }

    #[test]
    fn test_create_cooldown_store() {
        let memory = create_cooldown_store(&EngineSettings::default());
        assert_eq!(memory.location(), "memory");

        let settings = EngineSettings {
            persistent_cooldowns: true,
            data_file: PathBuf::from("data/cooldowns.yml"),
            ..Default::default()
        };
        assert_eq!(create_cooldown_store(&settings).location(), "data/cooldowns.yml");
    }
}
