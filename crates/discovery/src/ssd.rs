//! Single Source Distribution store
//!
//! Concurrent map of `name -> (name, version)` where a higher version always
//! wins. The in-memory map is guarded by a read-write lock; file persistence
//! is serialized by a separate mutex so readers never wait on disk.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tincmesh_common::Result;

/// One distributed record: a node name and its monotone version clock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version")]
    pub version: i64,
}

impl Entity {
    pub fn new(name: impl Into<String>, version: i64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// Monotone entity store with atomic JSON persistence
pub struct Ssd {
    entities: RwLock<HashMap<String, Entity>>,
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl Ssd {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            path: path.into(),
            file_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a merge of this entity would succeed right now. Read-only;
    /// the answer may be stale by the time a merge is attempted.
    pub fn can_be_merged(&self, entity: &Entity) -> bool {
        let entities = self.entities.read();
        is_newer(&entities, &entity.name, entity.version)
    }

    /// Store the entity if it is strictly newer than the current record.
    pub fn replace_if_newer(&self, entity: Entity) -> bool {
        self.merge(entity, || true)
    }

    /// Store the entity if strictly newer, running `commit` under the write
    /// lock first; a `false` return aborts the merge and leaves the store
    /// unchanged. The callback must be quick and must not re-enter the store.
    pub fn replace_if_newer_with(&self, entity: Entity, commit: impl FnOnce() -> bool) -> bool {
        self.merge(entity, commit)
    }

    fn merge(&self, entity: Entity, commit: impl FnOnce() -> bool) -> bool {
        let mut entities = self.entities.write();
        if !is_newer(&entities, &entity.name, entity.version) {
            return false;
        }
        if !commit() {
            return false;
        }
        entities.insert(entity.name.clone(), entity);
        true
    }

    /// Unconditional set; used for the self entity at startup
    pub fn replace(&self, entity: Entity) {
        self.entities.write().insert(entity.name.clone(), entity);
    }

    /// The stored entity, only when its version is strictly greater than
    /// `after`
    pub fn get_if_newer(&self, name: &str, after: i64) -> Option<Entity> {
        let entities = self.entities.read();
        entities
            .get(name)
            .filter(|entity| entity.version > after)
            .cloned()
    }

    /// Snapshot of every stored entity
    pub fn header(&self) -> Vec<Entity> {
        self.entities.read().values().cloned().collect()
    }

    /// Persist the current snapshot: write a temp file next to the target,
    /// fsync, then rename over it.
    pub fn save(&self) -> Result<()> {
        let _guard = self.file_lock.lock();
        let items = self.header();

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let base = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{base}."))
            .suffix(".tmp")
            .tempfile_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &items)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        debug!(path = %self.path.display(), entities = items.len(), "saved discovery state");
        Ok(())
    }

    /// Load the persisted snapshot, replacing the in-memory map. A missing
    /// file is not an error.
    pub fn read(&self) -> Result<()> {
        let _guard = self.file_lock.lock();
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let items: Vec<Entity> = serde_json::from_slice(&data)?;
        let mut map = HashMap::with_capacity(items.len());
        for entity in items {
            map.insert(entity.name.clone(), entity);
        }
        *self.entities.write() = map;
        Ok(())
    }
}

fn is_newer(entities: &HashMap<String, Entity>, name: &str, desired: i64) -> bool {
    match entities.get(name) {
        None => true,
        Some(stored) => desired > stored.version,
    }
}
