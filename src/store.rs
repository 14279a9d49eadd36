use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Opaque string-keyed storage. The session core only ever gets, sets and
/// removes by key; what backs it is the embedder's business.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// A JSON file of key/value pairs, rewritten on every mutation. Small and
/// honest; the store holds a handful of connection entries, not data.
pub struct FileStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileStore {
    pub fn open(path: PathBuf) -> Result<FileStore> {
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };

        Ok(FileStore {
            path,
            values: Mutex::new(values),
        })
    }

    fn flush(&self, values: &HashMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing {}", self.path.display()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.lock();
        values.insert(key.to_string(), value.to_string());
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.lock();
        values.remove(key);
        self.flush(&values)
    }
}

/// One saved server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedConnection {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_playlist_by_type: Option<String>,
}

const CONNECTIONS_KEY: &str = "mpdlink:connections";

/// The saved-connection list over an opaque [`KvStore`]. An entry is
/// rejected when its name, or its host+port pair, is already taken.
pub struct ConnectionRegistry<S> {
    store: S,
}

impl<S: KvStore> ConnectionRegistry<S> {
    pub fn new(store: S) -> ConnectionRegistry<S> {
        ConnectionRegistry { store }
    }

    pub fn list(&self) -> Result<Vec<SavedConnection>> {
        match self.store.get(CONNECTIONS_KEY)? {
            Some(json) => serde_json::from_str(&json).context("parsing saved connections"),
            None => Ok(Vec::new()),
        }
    }

    pub fn add(&self, connection: SavedConnection) -> Result<bool> {
        let mut connections = self.list()?;

        let taken = connections.iter().any(|c| {
            c.name == connection.name || (c.host == connection.host && c.port == connection.port)
        });
        if taken {
            return Ok(false);
        }

        connections.push(connection);
        self.save(&connections)?;
        Ok(true)
    }

    pub fn update(&self, connection: SavedConnection) -> Result<bool> {
        let mut connections = self.list()?;

        let Some(existing) = connections.iter_mut().find(|c| {
            c.name == connection.name && c.host == connection.host && c.port == connection.port
        }) else {
            return Ok(false);
        };

        *existing = connection;
        self.save(&connections)?;
        Ok(true)
    }

    pub fn remove(&self, name: &str, host: &str, port: u16) -> Result<bool> {
        let mut connections = self.list()?;
        let before = connections.len();
        connections.retain(|c| !(c.name == name && c.host == host && c.port == port));

        if connections.len() == before {
            return Ok(false);
        }

        self.save(&connections)?;
        Ok(true)
    }

    fn save(&self, connections: &[SavedConnection]) -> Result<()> {
        let json = serde_json::to_string(connections)?;
        self.store.set(CONNECTIONS_KEY, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(name: &str, host: &str, port: u16) -> SavedConnection {
        SavedConnection {
            name: name.to_string(),
            host: host.to_string(),
            port,
            pwd: None,
            random_playlist_by_type: None,
        }
    }

    #[test]
    fn add_list_remove() {
        let registry = ConnectionRegistry::new(MemoryStore::default());
        assert!(registry.list().unwrap().is_empty());

        assert!(registry.add(conn("den", "10.0.0.2", 6600)).unwrap());
        assert!(registry.add(conn("attic", "10.0.0.3", 6600)).unwrap());
        assert_eq!(registry.list().unwrap().len(), 2);

        assert!(registry.remove("den", "10.0.0.2", 6600).unwrap());
        assert_eq!(registry.list().unwrap().len(), 1);
        assert!(!registry.remove("den", "10.0.0.2", 6600).unwrap());
    }

    #[test]
    fn duplicate_name_or_endpoint_refused() {
        let registry = ConnectionRegistry::new(MemoryStore::default());
        assert!(registry.add(conn("den", "10.0.0.2", 6600)).unwrap());

        // same name, different host
        assert!(!registry.add(conn("den", "10.0.0.9", 6600)).unwrap());
        // different name, same host+port
        assert!(!registry.add(conn("other", "10.0.0.2", 6600)).unwrap());
        // same host, different port is fine
        assert!(registry.add(conn("other", "10.0.0.2", 6601)).unwrap());
    }

    #[test]
    fn update_replaces_matching_entry() {
        let registry = ConnectionRegistry::new(MemoryStore::default());
        registry.add(conn("den", "10.0.0.2", 6600)).unwrap();

        let mut updated = conn("den", "10.0.0.2", 6600);
        updated.pwd = Some("secret".to_string());
        assert!(registry.update(updated.clone()).unwrap());
        assert_eq!(registry.list().unwrap()[0], updated);

        assert!(!registry.update(conn("nope", "10.0.0.2", 6600)).unwrap());
    }
}
