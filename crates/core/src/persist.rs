//! Storage of per-site preferences: enablement flags and list order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::provider::ProviderId;
use crate::registry::ListType;

/// Reads and writes the user's site preferences. Implementations must be
/// cheap to call; the registry consults them only on load and on change.
pub trait SitePersistence: Send + Sync {
    fn enabled(&self, list: ListType, provider: ProviderId) -> Option<bool>;
    fn set_enabled(&self, list: ListType, provider: ProviderId, enabled: bool) -> Result<(), PersistError>;
    /// Comma-separated provider ids, enabled and disabled alike.
    fn order(&self, list: ListType) -> Option<String>;
    fn set_order(&self, list: ListType, csv: &str) -> Result<(), PersistError>;
    /// Forget everything stored for `list`.
    fn clear(&self, list: ListType) -> Result<(), PersistError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SiteState {
    #[serde(default)]
    enabled: BTreeMap<String, bool>,
    #[serde(default)]
    order: BTreeMap<String, String>,
}

impl SiteState {
    fn enabled_key(list: ListType, provider: ProviderId) -> String {
        format!("{}.{}", list.key(), provider)
    }

    fn clear(&mut self, list: ListType) {
        let prefix = format!("{}.", list.key());
        self.enabled.retain(|k, _| !k.starts_with(&prefix));
        self.order.remove(list.key());
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-process persistence, for tests and for embedders that store
/// preferences elsewhere.
#[derive(Debug, Default)]
pub struct MemorySitePersistence {
    state: Mutex<SiteState>,
}

impl MemorySitePersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SitePersistence for MemorySitePersistence {
    fn enabled(&self, list: ListType, provider: ProviderId) -> Option<bool> {
        lock(&self.state).enabled.get(&SiteState::enabled_key(list, provider)).copied()
    }

    fn set_enabled(&self, list: ListType, provider: ProviderId, enabled: bool) -> Result<(), PersistError> {
        lock(&self.state).enabled.insert(SiteState::enabled_key(list, provider), enabled);
        Ok(())
    }

    fn order(&self, list: ListType) -> Option<String> {
        lock(&self.state).order.get(list.key()).cloned()
    }

    fn set_order(&self, list: ListType, csv: &str) -> Result<(), PersistError> {
        lock(&self.state).order.insert(list.key().to_string(), csv.to_string());
        Ok(())
    }

    fn clear(&self, list: ListType) -> Result<(), PersistError> {
        lock(&self.state).clear(list);
        Ok(())
    }
}

/// TOML file persistence; the whole file is rewritten on every change.
///
/// ```toml
/// [enabled]
/// "data.2" = false
///
/// [order]
/// data = "5,2,6,1"
/// ```
#[derive(Debug)]
pub struct TomlSitePersistence {
    path: PathBuf,
    state: Mutex<SiteState>,
}

impl TomlSitePersistence {
    /// Open `path`. A missing or malformed file starts out empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match read_state(&path) {
            Ok(s) => s,
            Err(PersistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => SiteState::default(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable site state {}: {}", path.display(), e);
                SiteState::default()
            }
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, f: impl FnOnce(&mut SiteState)) -> Result<(), PersistError> {
        let mut state = lock(&self.state);
        f(&mut state);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(&*state)?)?;
        Ok(())
    }
}

fn read_state(path: &Path) -> Result<SiteState, PersistError> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

impl SitePersistence for TomlSitePersistence {
    fn enabled(&self, list: ListType, provider: ProviderId) -> Option<bool> {
        lock(&self.state).enabled.get(&SiteState::enabled_key(list, provider)).copied()
    }

    fn set_enabled(&self, list: ListType, provider: ProviderId, enabled: bool) -> Result<(), PersistError> {
        self.update(|s| {
            s.enabled.insert(SiteState::enabled_key(list, provider), enabled);
        })
    }

    fn order(&self, list: ListType) -> Option<String> {
        lock(&self.state).order.get(list.key()).cloned()
    }

    fn set_order(&self, list: ListType, csv: &str) -> Result<(), PersistError> {
        self.update(|s| {
            s.order.insert(list.key().to_string(), csv.to_string());
        })
    }

    fn clear(&self, list: ListType) -> Result<(), PersistError> {
        self.update(|s| s.clear(list))
    }
}
