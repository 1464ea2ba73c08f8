use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

/// Named slots in a single JSON object file.
///
/// Every write re-reads the file, changes one key and writes the whole
/// object back. There is no locking: the last writer wins. A file that
/// exists but is not a JSON object fails the write and is left untouched.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing, unreadable and corrupt files all read as an absent key.
    pub fn get_item(&self, key: &str) -> Option<Value> {
        read_json_object(&self.path).ok()??.get(key).cloned()
    }

    pub fn set_item(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut on_disk = read_json_object(&self.path)?.unwrap_or_default();
        on_disk.insert(key.to_string(), value);
        write_json_object(&self.path, &on_disk)
    }

    pub fn remove_item(&self, key: &str) -> anyhow::Result<()> {
        let Some(mut on_disk) = read_json_object(&self.path)? else {
            return Ok(());
        };
        if on_disk.remove(key).is_none() {
            return Ok(());
        }
        write_json_object(&self.path, &on_disk)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get_item(key).is_some()
    }
}

/// `Ok(None)` when the file does not exist yet.
fn read_json_object(path: &Path) -> anyhow::Result<Option<Map<String, Value>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    match parsed {
        Value::Object(map) => Ok(Some(map)),
        _ => anyhow::bail!("{} does not hold a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::LocalStore;

    #[test]
    fn set_get_remove_round_trip() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path().join("storage.json"));

        assert_eq!(store.get_item("key"), None);
        store.set_item("key", json!([1, 2]))?;
        assert_eq!(store.get_item("key"), Some(json!([1, 2])));

        store.remove_item("key")?;
        assert_eq!(store.get_item("key"), None);
        assert!(!store.contains_key("key"));
        Ok(())
    }

    #[test]
    fn writes_keep_other_slots() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let store_a = LocalStore::new(&path);
        let store_b = LocalStore::new(&path);

        store_a.set_item("a", json!("one"))?;
        store_b.set_item("b", json!("two"))?;
        store_a.remove_item("a")?;

        let reloaded = LocalStore::new(path);
        assert_eq!(reloaded.get_item("a"), None);
        assert_eq!(reloaded.get_item("b"), Some(json!("two")));
        Ok(())
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_is_never_overwritten() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        std::fs::write(&path, "{not json")?;
        let store = LocalStore::new(&path);

        assert_eq!(store.get_item("key"), None);
        assert!(!store.contains_key("key"));
        let err = store.set_item("key", json!(true)).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"));
        assert!(store.remove_item("key").is_err());
        assert_eq!(std::fs::read_to_string(&path)?, "{not json");

        std::fs::write(&path, "[1, 2]")?;
        assert!(store.set_item("key", json!(true)).is_err());
        Ok(())
    }
}
