use crate::tags::structures::{Quality, Tag, TagSnapshot, TagValue, ValueVariant};
use dashmap::DashMap; // Using DashMap for concurrent R/W access
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Published whenever a tag update reports a change.
#[derive(Debug, Clone)]
pub struct TagChange {
    pub tag_name: String,
    pub previous: TagValue,
    pub current: TagValue,
}

/// Manages the state of all tags in the system.
/// Uses DashMap for thread-safe access.
#[derive(Debug, Clone)] // Clone provides cheap Arc clones
pub struct TagEngine {
    tags: Arc<DashMap<String, Arc<Tag>>>,
    changes: broadcast::Sender<TagChange>,
}

impl TagEngine {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        TagEngine {
            tags: Arc::new(DashMap::new()),
            changes,
        }
    }

    /// Add a tag definition, replacing any tag with the same name.
    pub fn register_tag(&self, tag: Tag) -> Arc<Tag> {
        let tag = Arc::new(tag);
        self.tags.insert(tag.name.clone(), Arc::clone(&tag));
        tag
    }

    pub fn get_tag(&self, name: &str) -> Option<Arc<Tag>> {
        self.tags.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Get a snapshot of a tag's value.
    pub fn read_tag(&self, name: &str) -> Option<TagValue> {
        self.tags.get(name).map(|entry| entry.value().snapshot())
    }

    /// Update a tag and publish the change. `None` when the tag is unknown.
    pub fn update_tag_value(
        &self,
        name: &str,
        value: ValueVariant,
        quality: Quality,
    ) -> Option<bool> {
        let tag = self.get_tag(name)?;
        let replaced = tag.replace(value, quality);
        let changed = replaced.is_some();
        if let Some((previous, current)) = replaced {
            self.notify(TagChange {
                tag_name: tag.name.clone(),
                previous,
                current,
            });
        }
        Some(changed)
    }

    /// Get a list of all registered tag names.
    pub fn get_all_tag_paths(&self) -> Vec<String> {
        self.tags.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn get_all_tags(&self) -> Vec<TagSnapshot> {
        let mut all: Vec<TagSnapshot> = self
            .tags
            .iter()
            .map(|entry| TagSnapshot::from(entry.value().as_ref()))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn tags_for_driver(&self, driver_id: &str) -> Vec<Arc<Tag>> {
        let mut tags: Vec<Arc<Tag>> = self
            .tags
            .iter()
            .filter(|entry| entry.value().driver_id == driver_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TagChange> {
        self.changes.subscribe()
    }

    /// Fan a change out to subscribers. Having none is not an error.
    pub fn notify(&self, change: TagChange) {
        if self.changes.send(change).is_err() {
            debug!("No change subscribers registered");
        }
    }
}

impl Default for TagEngine {
    fn default() -> Self {
        Self::new()
    }
}
