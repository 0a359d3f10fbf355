use crate::events::model::{ActionableFile, EventRecord, StorageEvent};

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub raw_bucket: String,
    /// Recognized log extension, e.g. `.mcap`.
    pub suffix: String,
    pub key_prefix: Option<String>,
    /// Empty accepts every event name.
    pub event_prefixes: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            raw_bucket: "raw-data".to_string(),
            suffix: ".mcap".to_string(),
            key_prefix: None,
            event_prefixes: Vec::new(),
        }
    }
}

/// Reduces a storage event to the files worth processing. Pure; never blocks.
#[derive(Debug, Clone)]
pub struct NotificationFilter {
    cfg: FilterConfig,
}

impl NotificationFilter {
    pub fn new(cfg: FilterConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.cfg
    }

    /// Lazily yields actionable files in record order. Non-matching records are skipped.
    pub fn filter<'a>(
        &'a self,
        event: &'a StorageEvent,
    ) -> impl Iterator<Item = ActionableFile> + 'a {
        event
            .records()
            .iter()
            .filter(move |record| self.matches(record))
            .map(ActionableFile::from_record)
    }

    pub fn matches(&self, record: &EventRecord) -> bool {
        if record.bucket != self.cfg.raw_bucket {
            return false;
        }

        let key = record.object_key.as_str();
        if key.len() <= self.cfg.suffix.len() || !key.ends_with(&self.cfg.suffix) {
            return false;
        }

        if let Some(prefix) = &self.cfg.key_prefix {
            if !key.starts_with(prefix.as_str()) {
                return false;
            }
        }

        self.cfg.event_prefixes.is_empty()
            || self
                .cfg
                .event_prefixes
                .iter()
                .any(|p| record.event_name.starts_with(p.as_str()))
    }
}
