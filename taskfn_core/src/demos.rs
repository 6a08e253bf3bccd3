//! Few-shot demonstrations harvested from logged records.

use crate::Result;
use crate::logging::{RecordStore, Section};
use crate::models::FieldMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Keys of the legacy flat record shape that are bookkeeping, not fields.
const LEGACY_RESERVED: [&str; 4] = ["section", "timestamp", "module", "description"];

/// One historical example: a flat field name → value mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Demonstration(pub FieldMap);

impl Demonstration {
    pub fn fields(&self) -> &FieldMap {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Flatten a persisted record into a demonstration.
    ///
    /// Accepts the structured shape (`inputs`/`outputs` as `{name, value}` lists or maps)
    /// and the legacy flat shape. Returns `None` for anything that yields no fields.
    pub fn from_record(record: &Value) -> Option<Self> {
        let obj = record.as_object()?;
        let mut fields = FieldMap::new();
        if obj.contains_key("inputs") || obj.contains_key("outputs") {
            for key in ["inputs", "outputs"] {
                if let Some(v) = obj.get(key) {
                    collect_fields(v, &mut fields)?;
                }
            }
        } else {
            for (k, v) in obj {
                if !LEGACY_RESERVED.contains(&k.as_str()) {
                    fields.insert(k.clone(), v.clone());
                }
            }
        }
        if fields.is_empty() {
            return None;
        }
        Some(Self(fields))
    }
}

impl From<FieldMap> for Demonstration {
    fn from(fields: FieldMap) -> Self {
        Self(fields)
    }
}

fn collect_fields(v: &Value, out: &mut FieldMap) -> Option<()> {
    match v {
        Value::Array(items) => {
            for item in items {
                let name = item.get("name")?.as_str()?;
                let value = item.get("value").cloned().unwrap_or(Value::Null);
                out.insert(name.to_string(), value);
            }
            Some(())
        }
        Value::Object(map) => {
            out.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(())
        }
        Value::Null => Some(()),
        _ => None,
    }
}

fn record_score(record: &Value) -> Option<f32> {
    record.get("score").and_then(Value::as_f64).map(|s| s as f32)
}

/// Reads the `training` section of a task and turns each record into a demonstration.
#[derive(Clone)]
pub struct DemoLoader {
    store: Arc<dyn RecordStore>,
    min_score: Option<f32>,
}

impl DemoLoader {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            min_score: None,
        }
    }

    /// Drop scored records below `min_score`. Unscored records are kept.
    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    /// Demonstrations for `task_name` in record order. Malformed lines are skipped.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn load(&self, task_name: &str) -> Result<Vec<Demonstration>> {
        let lines = self.store.read(task_name, Section::Training)?;
        let mut out = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(line = idx + 1, error = %e, "skipping unparsable record");
                    continue;
                }
            };
            if let (Some(min), Some(score)) = (self.min_score, record_score(&record)) {
                if score < min {
                    continue;
                }
            }
            match Demonstration::from_record(&record) {
                Some(demo) => out.push(demo),
                None => tracing::debug!(line = idx + 1, "skipping record without fields"),
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for DemoLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoLoader")
            .field("min_score", &self.min_score)
            .finish_non_exhaustive()
    }
}

/// Decides which section a freshly logged record belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DemoSelector {
    pub min_score: Option<f32>,
}

impl DemoSelector {
    pub fn new(min_score: Option<f32>) -> Self {
        Self { min_score }
    }

    /// `training` only for a score at or above the threshold.
    pub fn section_for(&self, score: Option<f32>) -> Section {
        match (self.min_score, score) {
            (Some(min), Some(s)) if s >= min => Section::Training,
            _ => Section::Logged,
        }
    }
}
