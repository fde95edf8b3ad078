use crate::install::Install;
use crate::paths::InstallPaths;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};
use thiserror::Error;
use tracing::{error, info, warn};

pub const AUTO_RELOAD_KEY: &str = "lua.auto_reload_scripts";
pub const AUTO_RELOAD_CHANGED_KEY: &str = "lua.auto_reload_changed_scripts";

type Document = Map<String, Value>;

#[derive(Debug, Error)]
enum WriteError {
    #[error("serialize settings document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("write settings file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    document: Document,
    modified: SystemTime,
}

/// Cached access to the two per-installation settings documents.
///
/// Each installation has its own file and its own cache slot; a cache slot is
/// trusted only while the file's mtime matches the one recorded when the slot
/// was filled. Reads never fail and writes never panic: problems are logged
/// and surfaced as `None`/`false`.
pub struct SettingsStore {
    files: [PathBuf; 2],
    cache: [Option<CacheEntry>; 2],
}

impl SettingsStore {
    pub fn new(legacy_file: PathBuf, enhanced_file: PathBuf) -> SettingsStore {
        SettingsStore {
            files: [legacy_file, enhanced_file],
            cache: [None, None],
        }
    }

    /// Builds the store on the standard per-installation paths, making sure
    /// each settings file's parent directory exists.
    pub fn from_registry() -> Result<SettingsStore> {
        let legacy = InstallPaths::resolve(Install::Legacy)?;
        let enhanced = InstallPaths::resolve(Install::Enhanced)?;
        for paths in [&legacy, &enhanced] {
            fs::create_dir_all(&paths.data_dir).with_context(|| {
                format!("create {} data dir", paths.install.display_name())
            })?;
        }
        Ok(SettingsStore::new(
            legacy.settings_file,
            enhanced.settings_file,
        ))
    }

    /// Reads the value at a dot-delimited key path. `None` when any segment
    /// is absent or an intermediate segment is not a mapping.
    pub fn get(&mut self, key_path: &str, install: Install) -> Option<Value> {
        let document = self.document(install);
        let mut segments = key_path.split('.');
        let mut current = document.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }

    pub fn get_or(&mut self, key_path: &str, default: Value, install: Install) -> Value {
        self.get(key_path, install).unwrap_or(default)
    }

    /// Writes the value at a dot-delimited key path and persists the whole
    /// document. Intermediate segments are created as mappings; a scalar
    /// sitting where a mapping is needed is overwritten. Returns `false`
    /// after logging when the document cannot be persisted.
    pub fn set(&mut self, key_path: &str, value: Value, install: Install) -> bool {
        let mut document = self.document(install);

        let mut segments: Vec<&str> = key_path.split('.').collect();
        let leaf = match segments.pop() {
            Some(leaf) => leaf,
            None => return false,
        };

        let mut node = &mut document;
        for segment in segments {
            let slot = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if !slot.is_object() {
                *slot = Value::Object(Document::new());
            }
            node = match slot.as_object_mut() {
                Some(map) => map,
                None => {
                    error!(
                        key_path,
                        install = install.as_str(),
                        "settings key path traversal failed"
                    );
                    return false;
                }
            };
        }
        node.insert(leaf.to_string(), value);

        self.persist(install, document)
    }

    /// Writes the default document if no settings file exists yet. A present
    /// file is left alone, even a malformed one.
    pub fn ensure_exists(&mut self, install: Install) -> bool {
        let path = &self.files[install.index()];
        if path.exists() {
            return true;
        }
        if self.persist(install, default_document()) {
            info!(
                install = install.as_str(),
                path = %self.files[install.index()].display(),
                "created default settings file"
            );
            true
        } else {
            false
        }
    }

    /// Copies the source installation's changed-scripts flag into the target
    /// document, touching nothing else there. Same source and target is a
    /// successful no-op.
    pub fn sync_auto_reload(&mut self, source: Install, target: Install) -> bool {
        if source == target {
            warn!(
                install = source.as_str(),
                "sync requested between identical installations; nothing to do"
            );
            return true;
        }
        let value = self.auto_reload_changed_scripts(source);
        self.set_auto_reload_changed_scripts(value, target)
    }

    pub fn auto_reload_scripts(&mut self, install: Install) -> bool {
        self.flag(AUTO_RELOAD_KEY, install)
    }

    pub fn set_auto_reload_scripts(&mut self, value: bool, install: Install) -> bool {
        self.set(AUTO_RELOAD_KEY, Value::Bool(value), install)
    }

    pub fn auto_reload_changed_scripts(&mut self, install: Install) -> bool {
        self.flag(AUTO_RELOAD_CHANGED_KEY, install)
    }

    pub fn set_auto_reload_changed_scripts(&mut self, value: bool, install: Install) -> bool {
        self.set(AUTO_RELOAD_CHANGED_KEY, Value::Bool(value), install)
    }

    /// Both installations' changed-scripts flags, legacy first.
    pub fn both_auto_reload_changed(&mut self) -> (bool, bool) {
        (
            self.auto_reload_changed_scripts(Install::Legacy),
            self.auto_reload_changed_scripts(Install::Enhanced),
        )
    }

    #[allow(dead_code)]
    pub fn set_both_auto_reload_changed(&mut self, legacy: bool, enhanced: bool) -> bool {
        let first = self.set_auto_reload_changed_scripts(legacy, Install::Legacy);
        let second = self.set_auto_reload_changed_scripts(enhanced, Install::Enhanced);
        first && second
    }

    /// Older callers treat the two auto-reload keys as a single switch; this
    /// sets both at once. Kept alongside the per-key setters, not merged
    /// with them.
    pub fn set_auto_reload(&mut self, value: bool, install: Install) -> bool {
        let scripts = self.set_auto_reload_scripts(value, install);
        let changed = self.set_auto_reload_changed_scripts(value, install);
        scripts && changed
    }

    fn flag(&mut self, key_path: &str, install: Install) -> bool {
        self.get(key_path, install)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    /// Current document for an installation, by value. Serves the cache while
    /// the file's mtime is unchanged; otherwise re-reads. A missing file
    /// reads as empty without touching the cache; a malformed file reads as
    /// empty and is not cached, so the next read retries the parse.
    fn document(&mut self, install: Install) -> Document {
        let slot = install.index();
        let path = self.files[slot].clone();

        let modified = match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => return Document::new(),
        };

        if let Some(entry) = &self.cache[slot] {
            if entry.modified == modified {
                return entry.document.clone();
            }
        }

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read settings file"
                );
                return Document::new();
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(document)) => {
                self.cache[slot] = Some(CacheEntry {
                    document: document.clone(),
                    modified,
                });
                document
            }
            Ok(_) => {
                warn!(
                    path = %path.display(),
                    "settings root is not a mapping; reading as empty"
                );
                Document::new()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "settings file is not valid JSON; reading as empty"
                );
                Document::new()
            }
        }
    }

    fn persist(&mut self, install: Install, document: Document) -> bool {
        let slot = install.index();
        match write_document(&self.files[slot], &document) {
            Ok(modified) => {
                self.cache[slot] = Some(CacheEntry { document, modified });
                true
            }
            Err(err) => {
                error!(
                    path = %self.files[slot].display(),
                    error = %err,
                    "failed to persist settings"
                );
                false
            }
        }
    }
}

/// Stages the serialized document next to the target and renames it into
/// place, so readers only ever see a complete file. Returns the mtime of the
/// file that was just written.
fn write_document(path: &Path, document: &Document) -> Result<SystemTime, WriteError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let staged = temp_path(path);
    fs::write(&staged, render_document(document)?)?;
    if let Err(err) = fs::rename(&staged, path) {
        let _ = fs::remove_file(&staged);
        return Err(err.into());
    }

    let modified = fs::metadata(path)?.modified()?;
    Ok(modified)
}

fn render_document(document: &Document) -> Result<Vec<u8>, serde_json::Error> {
    let mut raw = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut raw, formatter);
    document.serialize(&mut serializer)?;
    Ok(raw)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".tmp");
    PathBuf::from(raw)
}

fn default_document() -> Document {
    let mut lua = Document::new();
    lua.insert("auto_reload_scripts".to_string(), Value::Bool(false));
    lua.insert("auto_reload_changed_scripts".to_string(), Value::Bool(false));

    let mut debug = Document::new();
    debug.insert("external_console".to_string(), Value::Bool(false));

    let mut theme = Document::new();
    theme.insert("light_mode".to_string(), Value::Bool(false));

    let mut document = Document::new();
    document.insert("lua".to_string(), Value::Object(lua));
    document.insert("debug".to_string(), Value::Object(debug));
    document.insert("theme".to_string(), Value::Object(theme));
    document
}
