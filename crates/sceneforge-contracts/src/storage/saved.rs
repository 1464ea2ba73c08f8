use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::events::EventWriter;
use crate::storage::LocalStore;

pub const SAVED_IMAGES_KEY: &str = "savedImages";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub id: String,
    pub url: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// The saved gallery: loaded once, written back in full on every mutation.
#[derive(Debug, Clone)]
pub struct SavedImages {
    store: LocalStore,
    images: Vec<StoredImage>,
    events: Option<EventWriter>,
}

impl SavedImages {
    pub fn load(store: LocalStore) -> Self {
        let images = store
            .get_item(SAVED_IMAGES_KEY)
            .and_then(|value| serde_json::from_value::<Vec<StoredImage>>(value).ok())
            .unwrap_or_default();
        Self {
            store,
            images,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn images(&self) -> &[StoredImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&StoredImage> {
        self.images.iter().find(|image| image.id == id)
    }

    /// URL value comparison backing the "already saved" marker.
    pub fn is_saved(&self, url: &str) -> bool {
        self.images.iter().any(|image| image.url == url)
    }

    /// Appends a new record. Saving the same URL again creates another record.
    pub fn save(&mut self, url: &str) -> anyhow::Result<StoredImage> {
        let record = StoredImage {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let mut images = self.images.clone();
        images.push(record.clone());
        self.commit(images)?;
        self.emit("image_saved", json!({ "id": record.id, "count": self.images.len() }));
        Ok(record)
    }

    /// Returns whether a record with `id` existed.
    pub fn delete(&mut self, id: &str) -> anyhow::Result<bool> {
        let images: Vec<StoredImage> = self
            .images
            .iter()
            .filter(|image| image.id != id)
            .cloned()
            .collect();
        if images.len() == self.images.len() {
            return Ok(false);
        }
        self.commit(images)?;
        self.emit("image_deleted", json!({ "id": id, "count": self.images.len() }));
        Ok(true)
    }

    /// Drops every record and removes the storage key.
    pub fn clear(&mut self) -> anyhow::Result<()> {
        let removed = self.images.len();
        self.store.remove_item(SAVED_IMAGES_KEY)?;
        self.images.clear();
        self.emit("saved_cleared", json!({ "removed": removed }));
        Ok(())
    }

    /// Memory only follows a successful write.
    fn commit(&mut self, images: Vec<StoredImage>) -> anyhow::Result<()> {
        self.store
            .set_item(SAVED_IMAGES_KEY, serde_json::to_value(&images)?)?;
        self.images = images;
        Ok(())
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit_json(event_type, payload) {
            eprintln!("sceneforge: failed to record {event_type} event: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn gallery(temp: &tempfile::TempDir) -> SavedImages {
        SavedImages::load(LocalStore::new(temp.path().join("storage.json")))
    }

    #[test]
    fn save_appends_unique_records_and_persists() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut saved = gallery(&temp);
        let url = "data:image/png;base64,AAAA";

        assert!(!saved.is_saved(url));
        let first = saved.save(url)?;
        assert!(saved.is_saved(url));
        let second = saved.save(url)?;

        assert_ne!(first.id, second.id);
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(saved.len(), 2);

        let reloaded = gallery(&temp);
        assert_eq!(reloaded.images(), &[first, second]);
        Ok(())
    }

    #[test]
    fn delete_leaves_other_records_untouched() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut saved = gallery(&temp);
        let a = saved.save("data:image/png;base64,AAAA")?;
        let b = saved.save("data:image/png;base64,BBBB")?;
        let c = saved.save("data:image/png;base64,CCCC")?;

        assert!(saved.delete(&b.id)?);
        assert!(!saved.delete(&b.id)?);
        assert_eq!(saved.images(), &[a.clone(), c.clone()]);
        assert_eq!(gallery(&temp).images(), &[a, c]);
        Ok(())
    }

    #[test]
    fn clear_removes_the_storage_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path().join("storage.json"));
        store.set_item("theme", json!("dark"))?;
        let mut saved = SavedImages::load(store.clone());
        saved.save("data:image/png;base64,AAAA")?;
        assert!(store.contains_key(SAVED_IMAGES_KEY));

        saved.clear()?;
        assert!(saved.is_empty());
        assert!(!store.contains_key(SAVED_IMAGES_KEY));
        assert_eq!(store.get_item("theme"), Some(json!("dark")));
        Ok(())
    }

    #[test]
    fn failed_writes_leave_the_gallery_unchanged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let mut saved = SavedImages::load(LocalStore::new(&path));
        let kept = saved.save("data:image/png;base64,AAAA")?;

        std::fs::remove_file(&path)?;
        std::fs::create_dir(&path)?;

        let url = "data:image/png;base64,BBBB";
        assert!(saved.save(url).is_err());
        assert!(!saved.is_saved(url));
        assert_eq!(saved.images(), &[kept.clone()]);

        assert!(saved.delete(&kept.id).is_err());
        assert!(saved.clear().is_err());
        assert_eq!(saved.images(), &[kept]);
        Ok(())
    }

    #[test]
    fn mutations_are_logged_without_image_payloads() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut saved =
            gallery(&temp).with_events(EventWriter::new(&events_path, "session-1"));

        let record = saved.save("data:image/png;base64,AAAA")?;
        saved.delete(&record.id)?;
        saved.clear()?;

        let raw = std::fs::read_to_string(events_path)?;
        assert!(!raw.contains("AAAA"));
        let types: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(types, vec!["image_saved", "image_deleted", "saved_cleared"]);
        Ok(())
    }
}
