//! Durable key-value store and the tab persistence adapter built on it.
//!
//! Two keyed entries are kept: the JSON tab list and the active tab id. Reads never fail
//! (a missing or corrupt entry yields a fresh session); writes are best-effort.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::tab::{Message, Tab, DEFAULT_GREETING};

pub const STORAGE_KEY_TABS: &str = "portfolio-ai-tabs";
pub const STORAGE_KEY_ACTIVE_TAB: &str = "portfolio-ai-active-tab";

/// Minimal string key-value store (local storage).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// One file per key under a directory. Writes go to a temp file that is synced and renamed over
/// the target, so readers see either the old or the new value. Writers serialize on a sidecar
/// `<key>.lock` file.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn temp_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{}.json.tmp", key))
    }

    fn lock_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(s))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating storage directory {}", self.dir.display()))?;
        let lock_path = self.lock_path_for(key);
        // Released when the handle drops.
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("opening {}", lock_path.display()))?;
        lock.lock_exclusive()
            .with_context(|| format!("locking {}", lock_path.display()))?;

        let tmp = self.temp_path_for(key);
        let mut file = std::fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(value.as_bytes())
            .and_then(|_| file.sync_all())
            .with_context(|| format!("writing {}", tmp.display()))?;
        drop(file);

        let path = self.path_for(key);
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("replacing {} with {}", path.display(), tmp.display()))?;
        drop(lock);
        Ok(())
    }
}

/// In-process store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let g = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(g.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        g.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Tabs and active id as read from the store.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub tabs: Vec<Tab>,
    pub active_tab_id: Option<String>,
}

/// Reads and writes the tab collection through a [`KeyValueStore`].
pub struct TabStorage {
    store: Box<dyn KeyValueStore>,
    greeting: String,
}

impl TabStorage {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store,
            greeting: DEFAULT_GREETING.to_string(),
        }
    }

    /// Greeting used for the fresh tab created when nothing usable is stored.
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Load tabs and active id. Any fault falls back to one fresh tab.
    pub fn load(&self) -> LoadedSession {
        match self.try_load() {
            Ok(Some(session)) => session,
            Ok(None) => {
                log::debug!("no stored tabs, starting a fresh session");
                self.fresh()
            }
            Err(e) => {
                log::error!("error loading tabs from storage: {:#}", e);
                self.fresh()
            }
        }
    }

    fn try_load(&self) -> Result<Option<LoadedSession>> {
        let Some(raw) = self.store.get(STORAGE_KEY_TABS)? else {
            return Ok(None);
        };
        let mut tabs: Vec<Tab> =
            serde_json::from_str(&raw).context("parsing stored tabs")?;
        if tabs.is_empty() {
            return Ok(None);
        }
        for tab in &mut tabs {
            if tab.messages.is_empty() {
                log::debug!("tab {} was stored without messages, restoring the greeting", tab.id);
                tab.messages.push(Message::initial(&self.greeting));
            }
            for m in &mut tab.messages {
                // Nothing is in flight at startup; a stored streaming flag is a leftover.
                if m.is_streaming {
                    log::debug!("clearing stale streaming flag on message {}", m.id);
                    m.is_streaming = false;
                }
            }
        }
        let active_tab_id = self
            .store
            .get(STORAGE_KEY_ACTIVE_TAB)?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(Some(LoadedSession {
            tabs,
            active_tab_id,
        }))
    }

    fn fresh(&self) -> LoadedSession {
        let tab = Tab::new(None, &self.greeting);
        let id = tab.id.clone();
        LoadedSession {
            tabs: vec![tab],
            active_tab_id: Some(id),
        }
    }

    /// Write both entries. Failures are logged and swallowed.
    pub fn save(&self, tabs: &[Tab], active_tab_id: &str) {
        if let Err(e) = self.try_save(tabs, active_tab_id) {
            log::warn!("error saving tabs to storage: {:#}", e);
        }
    }

    fn try_save(&self, tabs: &[Tab], active_tab_id: &str) -> Result<()> {
        let json = serde_json::to_string(tabs).context("serializing tabs")?;
        self.store.set(STORAGE_KEY_TABS, &json)?;
        self.store.set(STORAGE_KEY_ACTIVE_TAB, active_tab_id)?;
        Ok(())
    }
}
