use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::CredentialStore;
use crate::error::{SessionError, SessionResult};

/// JSON-file backed store. The whole map is rewritten on every mutation via
/// a temp file + rename so a crash never leaves a half-written file.
pub struct FileCredentialStore {
    path: PathBuf,
    map: RwLock<HashMap<String, String>>,
}

impl FileCredentialStore {
    /// Open (or lazily create) the store at `path`. An unreadable or corrupt
    /// file is treated as empty: a lost credential only means logging in again.
    pub fn open<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| SessionError::storage(format!("create {}: {}", parent.display(), e)))?;
            }
        }
        let map = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, String>>(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!(target: "podium_auth", "credential store {} is corrupt, starting empty: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        debug!(target: "podium_auth", "credential store opened path={} keys={}", path.display(), map.len());
        Ok(Self { path, map: RwLock::new(map) })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn flush(&self, map: &HashMap<String, String>) -> SessionResult<()> {
        let bytes = serde_json::to_vec_pretty(map).map_err(|e| SessionError::storage(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| SessionError::storage(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| SessionError::storage(format!("rename {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> SessionResult<Option<String>> { Ok(self.map.read().get(key).cloned()) }

    fn put(&self, key: &str, value: &str) -> SessionResult<()> {
        let mut w = self.map.write();
        let prev = w.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&w) {
            // keep memory and disk in agreement
            match prev {
                Some(p) => { w.insert(key.to_string(), p); }
                None => { w.remove(key); }
            }
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> SessionResult<()> {
        let mut w = self.map.write();
        let Some(prev) = w.remove(key) else { return Ok(()) };
        if let Err(e) = self.flush(&w) {
            w.insert(key.to_string(), prev);
            return Err(e);
        }
        Ok(())
    }
}
