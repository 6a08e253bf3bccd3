//! Append-only result logging: records, storage backends and the logger itself.

pub mod record;
pub mod store;

pub use record::{LogRecord, NamedValue, RecordTimestamp};
pub use store::{JsonlStore, MemoryStore, RecordStore, Section};

use crate::Result;
use crate::models::FieldMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Records each invocation to a [`RecordStore`]. Disabled loggers only keep records that
/// belong to a reward group.
#[derive(Clone)]
pub struct ResultLogger {
    store: Arc<dyn RecordStore>,
    enabled: Arc<AtomicBool>,
}

impl ResultLogger {
    pub fn new(store: Arc<dyn RecordStore>, enabled: bool) -> Self {
        Self {
            store,
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Toggle logging for every holder of this logger.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Append one record to the `logged` section.
    #[tracing::instrument(level = "debug", skip_all, fields(task = %task_name))]
    pub fn record(
        &self,
        task_name: &str,
        inputs: &FieldMap,
        outputs: &FieldMap,
        description: Option<&str>,
    ) -> Result<()> {
        let record = LogRecord::new(task_name, inputs, outputs, description);
        self.append(Section::Logged, &record)
    }

    /// Append a prepared record to `section`.
    ///
    /// When disabled, only records carrying a reward group are written.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(task = %record.module, section = ?section)
    )]
    pub fn append(&self, section: Section, record: &LogRecord) -> Result<()> {
        if !self.is_enabled() && record.reward_group.is_none() {
            return Ok(());
        }
        let line = serde_json::to_string(record)?;
        self.store.append(&record.module, section, &line)
    }
}

impl std::fmt::Debug for ResultLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultLogger")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn disabled_logger_is_noop() {
        let store = Arc::new(MemoryStore::default());
        let logger = ResultLogger::new(store.clone(), false);
        logger
            .record("t", &fields(&[("a", json!(1))]), &FieldMap::new(), None)
            .unwrap();
        assert!(store.read("t", Section::Logged).unwrap().is_empty());
    }

    #[test]
    fn disabled_logger_keeps_reward_group_records() {
        let store = Arc::new(MemoryStore::default());
        let logger = ResultLogger::new(store.clone(), false);
        let mut grouped = LogRecord::new("t", &fields(&[("a", json!(1))]), &FieldMap::new(), None);
        grouped.reward_group = Some("g".to_string());
        logger.append(Section::Logged, &grouped).unwrap();
        let plain = LogRecord::new("t", &fields(&[("a", json!(2))]), &FieldMap::new(), None);
        logger.append(Section::Logged, &plain).unwrap();

        let lines = store.read("t", Section::Logged).unwrap();
        assert_eq!(lines.len(), 1);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["reward_group"], json!("g"));
    }

    #[test]
    fn toggling_is_shared_between_clones() {
        let store = Arc::new(MemoryStore::default());
        let logger = ResultLogger::new(store.clone(), false);
        let other = logger.clone();
        other.set_enabled(true);
        logger
            .record(
                "t",
                &fields(&[("a", json!(1))]),
                &fields(&[("b", json!(2))]),
                Some("desc"),
            )
            .unwrap();
        logger
            .record("t", &fields(&[("a", json!(3))]), &FieldMap::new(), None)
            .unwrap();
        let lines = store.read("t", Section::Logged).unwrap();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["module"], json!("t"));
        assert_eq!(first["inputs"], json!([{"name": "a", "value": 1}]));
        assert_eq!(first["outputs"], json!([{"name": "b", "value": 2}]));
        assert_eq!(first["description"], json!("desc"));
    }
}
