// Persistent key-value preferences for module calibration
//
// Reads never fail: a missing key, a value of the wrong type or an
// unreadable store all yield the caller's default. Writes are best effort
// and are logged when they cannot be made durable.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Error types for opening a preference file
#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("Cannot read preference file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Preference file {path} is not a JSON object: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Typed key-value store surviving process restarts
pub trait PreferenceStore {
    fn get_float(&self, key: &str, default: f64) -> f64;
    fn get_boolean(&self, key: &str, default: bool) -> bool;
    fn put_float(&mut self, key: &str, value: f64);
    fn put_boolean(&mut self, key: &str, value: bool);
}

/// Volatile store for tests and simulation
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    values: BTreeMap<String, Value>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_float(&self, key: &str, default: f64) -> f64 {
        self.values.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    fn get_boolean(&self, key: &str, default: bool) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    fn put_float(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), float_value(value));
    }

    fn put_boolean(&mut self, key: &str, value: bool) {
        self.values.insert(key.to_string(), Value::Bool(value));
    }
}

/// Store backed by a flat JSON object on disk, rewritten on every put
#[derive(Debug)]
pub struct JsonFilePreferences {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFilePreferences {
    /// Open the file at `path`; a missing file starts an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PrefsError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| PrefsError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No preference file at {}, starting empty", path.display());
                Map::new()
            }
            Err(source) => return Err(PrefsError::Io { path, source }),
        };
        debug!("Loaded {} preferences from {}", values.len(), path.display());
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn put(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
        if let Err(e) = self.flush() {
            warn!("Failed to persist preference {}: {}", key, e);
        }
    }

    /// Write the whole store to a sibling temp file, then rename over the original
    fn flush(&self) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.values)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn get_float(&self, key: &str, default: f64) -> f64 {
        self.values.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    fn get_boolean(&self, key: &str, default: bool) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    fn put_float(&mut self, key: &str, value: f64) {
        self.put(key, float_value(value));
    }

    fn put_boolean(&mut self, key: &str, value: bool) {
        self.put(key, Value::Bool(value));
    }
}

// JSON has no NaN or infinity; those are stored as null and read back as the default
fn float_value(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}
