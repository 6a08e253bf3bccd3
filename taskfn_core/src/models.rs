use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Named field values flowing in and out of a task.
pub type FieldMap = BTreeMap<String, Value>;

/// How a caller wraps its schema before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerKind {
    /// Single-step prediction.
    Predict,
    /// Multi-step reasoning: the backend also produces an intermediate rationale.
    ChainOfThought,
}

impl CallerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallerKind::Predict => "predict",
            CallerKind::ChainOfThought => "chain_of_thought",
        }
    }
}

impl fmt::Display for CallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional type hint attached to a schema field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    List,
    Object,
    Other(String),
}

impl FieldType {
    /// Map a Rust type as written in source to a field type.
    ///
    /// `Option<T>` and `Result<T, E>` map to `T`; references are looked through.
    pub fn from_rust(ty: &str) -> Option<Self> {
        let ty = ty.trim().trim_start_matches('&').trim();
        let ty = ty.strip_prefix("mut ").unwrap_or(ty).trim();
        if ty.is_empty() || ty == "()" || ty == "_" {
            return None;
        }
        if let Some(inner) = unwrap_generic(ty, "Option").or_else(|| unwrap_generic(ty, "Result"))
        {
            let first = split_top_level(inner, ',').into_iter().next()?;
            return Self::from_rust(first);
        }
        if ty.starts_with('[') {
            return Some(FieldType::List);
        }
        let path = ty.split('<').next().unwrap_or(ty).trim();
        let head = path.rsplit("::").next().unwrap_or(path).trim();
        Some(match head {
            "str" | "String" | "Cow" | "char" => FieldType::Text,
            "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
            | "u128" | "usize" => FieldType::Integer,
            "f32" | "f64" => FieldType::Float,
            "bool" => FieldType::Boolean,
            "Vec" | "VecDeque" | "HashSet" | "BTreeSet" => FieldType::List,
            "HashMap" | "BTreeMap" | "Map" | "Value" => FieldType::Object,
            other => FieldType::Other(other.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::List => "list",
            FieldType::Object => "object",
            FieldType::Other(name) => name,
        }
    }
}

fn unwrap_generic<'a>(ty: &'a str, name: &str) -> Option<&'a str> {
    let rest = ty.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('<')?.strip_suffix('>')?;
    Some(inner.trim())
}

/// Split `s` on `sep` while ignoring separators nested in brackets.
pub(crate) fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '<' | '[' | '{' => depth += 1,
            ')' | '>' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                out.push(s[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    let tail = s[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Structured result of one task execution: one entry per produced field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub fields: FieldMap,
}

impl Prediction {
    pub fn new(fields: FieldMap) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Pick `names` in order, failing on the first absent field.
    pub fn select(&self, names: &[String]) -> std::result::Result<Vec<Value>, String> {
        names
            .iter()
            .map(|n| self.fields.get(n).cloned().ok_or_else(|| n.clone()))
            .collect()
    }
}

impl From<FieldMap> for Prediction {
    fn from(fields: FieldMap) -> Self {
        Self { fields }
    }
}

/// Return value of a call: a single value for one declared output, else a tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallOutput {
    Single(Value),
    Tuple(Vec<Value>),
}

impl CallOutput {
    /// Shape ordered output values: exactly one becomes `Single`.
    pub fn from_values(mut values: Vec<Value>) -> Self {
        if values.len() == 1 {
            if let Some(v) = values.pop() {
                return CallOutput::Single(v);
            }
        }
        CallOutput::Tuple(values)
    }

    pub fn as_single(&self) -> Option<&Value> {
        match self {
            CallOutput::Single(v) => Some(v),
            CallOutput::Tuple(_) => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            CallOutput::Single(_) => None,
            CallOutput::Tuple(vs) => Some(vs),
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            CallOutput::Single(v) => vec![v],
            CallOutput::Tuple(vs) => vs,
        }
    }

    /// Convenience for the common single text output.
    pub fn as_str(&self) -> Option<&str> {
        self.as_single().and_then(Value::as_str)
    }

    /// JSON view used by metrics: `Single` stays a scalar, `Tuple` becomes an array.
    pub fn to_value(&self) -> Value {
        match self {
            CallOutput::Single(v) => v.clone(),
            CallOutput::Tuple(vs) => Value::Array(vs.clone()),
        }
    }
}
