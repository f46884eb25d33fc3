//! Durable (chat, user) → assistant thread mapping.
//!
//! The map lives in memory and is mirrored to a single pretty-printed JSON
//! object on disk, rewritten in full whenever a new pair is first seen.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    assistant::AssistantPort,
    domain::{ThreadId, ThreadKey},
    Result,
};

/// Port for the thread map, injected into the dispatcher.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Pure lookup.
    fn get(&self, key: &ThreadKey) -> Option<ThreadId>;

    /// Return the existing thread for `key`, or mint one via `factory`, record
    /// it, persist, and return it.
    ///
    /// No lock is held while `factory` runs: two concurrent first contacts for
    /// the same pair can both create threads, and the later insert wins.
    async fn get_or_create(
        &self,
        key: &ThreadKey,
        factory: &dyn AssistantPort,
    ) -> Result<ThreadId>;
}

/// File-backed store: `{"<chat>:<user>": "<thread id>", ...}`.
pub struct JsonFileThreadStore {
    path: PathBuf,
    threads: Mutex<BTreeMap<String, ThreadId>>,
}

impl JsonFileThreadStore {
    /// Load the map from `path`.
    ///
    /// A missing, unreadable or malformed file is not fatal: the store starts
    /// empty and the next insert overwrites the file.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let threads = read_map(&path);
        info!(path = %path.display(), threads = threads.len(), "thread map loaded");
        Self {
            path,
            threads: Mutex::new(threads),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ThreadId>> {
        // A poisoned map is still a valid map; keep serving it.
        self.threads.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert_and_persist(&self, key: &ThreadKey, thread: ThreadId) -> Result<()> {
        let mut map = self.lock();
        map.insert(key.to_string(), thread);
        let txt = serde_json::to_string_pretty(&*map)?;
        std::fs::write(&self.path, txt)?;
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for JsonFileThreadStore {
    fn get(&self, key: &ThreadKey) -> Option<ThreadId> {
        self.lock().get(&key.to_string()).cloned()
    }

    async fn get_or_create(
        &self,
        key: &ThreadKey,
        factory: &dyn AssistantPort,
    ) -> Result<ThreadId> {
        if let Some(existing) = self.get(key) {
            debug!(key = %key, thread = %existing, "reusing thread");
            return Ok(existing);
        }

        let thread = factory.create_thread().await?;
        self.insert_and_persist(key, thread.clone())?;
        info!(key = %key, thread = %thread, "created thread");
        Ok(thread)
    }
}

fn read_map(path: &Path) -> BTreeMap<String, ThreadId> {
    let txt = match std::fs::read_to_string(path) {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "thread map unreadable; starting empty");
            return BTreeMap::new();
        }
    };
    if txt.trim().is_empty() {
        return BTreeMap::new();
    }
    match serde_json::from_str(&txt) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "thread map malformed; starting empty");
            BTreeMap::new()
        }
    }
}
