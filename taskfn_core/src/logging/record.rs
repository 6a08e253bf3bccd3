use crate::models::FieldMap;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: Value,
}

/// When a record was written. Serialized as ISO-8601 UTC; epoch seconds are accepted on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordTimestamp(pub DateTime<Utc>);

impl RecordTimestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn epoch_seconds(&self) -> f64 {
        self.0.timestamp_micros() as f64 / 1_000_000.0
    }
}

impl Serialize for RecordTimestamp {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string())
    }
}

impl<'de> Deserialize<'de> for RecordTimestamp {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        match Value::deserialize(d)? {
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|t| RecordTimestamp(t.with_timezone(&Utc)))
                .map_err(de::Error::custom),
            Value::Number(n) => {
                let secs = n
                    .as_f64()
                    .ok_or_else(|| de::Error::custom("timestamp is not a finite number"))?;
                let micros = (secs * 1_000_000.0).round() as i64;
                Utc.timestamp_micros(micros)
                    .single()
                    .map(RecordTimestamp)
                    .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {secs}")))
            }
            other => Err(de::Error::custom(format!(
                "unsupported timestamp value: {other}"
            ))),
        }
    }
}

/// One persisted interaction, written one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub module: String,
    #[serde(deserialize_with = "de_fields")]
    pub inputs: Vec<NamedValue>,
    #[serde(deserialize_with = "de_fields")]
    pub outputs: Vec<NamedValue>,
    #[serde(default)]
    pub description: Option<String>,
    pub timestamp: RecordTimestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_group: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<String>,
}

impl LogRecord {
    pub fn new(
        module: impl Into<String>,
        inputs: &FieldMap,
        outputs: &FieldMap,
        description: Option<&str>,
    ) -> Self {
        Self {
            module: module.into(),
            inputs: to_named(inputs),
            outputs: to_named(outputs),
            description: description.map(str::to_string),
            timestamp: RecordTimestamp::now(),
            score: None,
            reward_group: None,
            instructions: Vec::new(),
        }
    }
}

fn to_named(fields: &FieldMap) -> Vec<NamedValue> {
    fields
        .iter()
        .map(|(k, v)| NamedValue {
            name: k.clone(),
            value: v.clone(),
        })
        .collect()
}

/// Accepts either `[{name, value}, ...]` or a flat `{name: value}` map.
fn de_fields<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<NamedValue>, D::Error> {
    match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value::<NamedValue>(item).map_err(de::Error::custom))
            .collect(),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(name, value)| NamedValue { name, value })
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(de::Error::custom(format!(
            "fields must be a list or a map, got {other}"
        ))),
    }
}
