use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Which of the two per-task files a record goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Records eligible as few-shot demonstrations.
    Training,
    /// Every other logged interaction.
    Logged,
}

impl Section {
    pub fn file_name(self) -> &'static str {
        match self {
            Section::Training => "training.jsonl",
            Section::Logged => "logged.jsonl",
        }
    }
}

/// Append-only, line-oriented storage scoped by task name.
pub trait RecordStore: Send + Sync {
    fn append(&self, task_name: &str, section: Section, line: &str) -> Result<()>;

    /// All lines of a section in write order. A missing section reads as empty.
    fn read(&self, task_name: &str, section: Section) -> Result<Vec<String>>;
}

/// JSONL files under `{root}/modules/{task_name}/`.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    root: PathBuf,
}

impl JsonlStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, task_name: &str) -> PathBuf {
        self.root.join("modules").join(sanitize_task_name(task_name))
    }

    pub fn section_path(&self, task_name: &str, section: Section) -> PathBuf {
        self.task_dir(task_name).join(section.file_name())
    }
}

impl RecordStore for JsonlStore {
    #[tracing::instrument(level = "debug", skip(self, line))]
    fn append(&self, task_name: &str, section: Section, line: &str) -> Result<()> {
        let dir = self.task_dir(task_name);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::store(format!("create {}", dir.display()), e))?;
        let path = dir.join(section.file_name());
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::store(format!("open {}", path.display()), e))?;
        // One write per record so concurrent appenders never interleave inside a line.
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line.trim_end_matches('\n'));
        buf.push('\n');
        f.write_all(buf.as_bytes())
            .map_err(|e| Error::store(format!("append {}", path.display()), e))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn read(&self, task_name: &str, section: Section) -> Result<Vec<String>> {
        let path = self.section_path(task_name, section);
        let f = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::store(format!("open {}", path.display()), e)),
        };
        BufReader::new(f)
            .lines()
            .map(|l| l.map_err(|e| Error::store(format!("read {}", path.display()), e)))
            .collect()
    }
}

/// In-process store, mostly for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sections: Mutex<HashMap<(String, Section), Vec<String>>>,
}

impl RecordStore for MemoryStore {
    fn append(&self, task_name: &str, section: Section, line: &str) -> Result<()> {
        self.sections
            .lock()
            .entry((task_name.to_string(), section))
            .or_default()
            .push(line.to_string());
        Ok(())
    }

    fn read(&self, task_name: &str, section: Section) -> Result<Vec<String>> {
        Ok(self
            .sections
            .lock()
            .get(&(task_name.to_string(), section))
            .cloned()
            .unwrap_or_default())
    }
}

/// Make a task name safe to use as a single directory component.
///
/// Names that had to be rewritten get a short digest of the original appended, so two
/// distinct names never share a directory.
pub fn sanitize_task_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' => c,
            _ => '_',
        })
        .collect();
    let trimmed = match cleaned.trim_matches('.') {
        "" => "_",
        s => s,
    };
    if trimmed == name {
        return name.to_string();
    }
    let digest = Sha256::digest(name.as_bytes());
    let mut out = String::with_capacity(trimmed.len() + 9);
    out.push_str(trimmed);
    out.push('-');
    for byte in &digest[..4] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
