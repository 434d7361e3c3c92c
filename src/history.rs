//! Prompt and script history, persisted as a JSON file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::config::HistoryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    Scene,
    Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: u64,
    pub prompt: String,
    pub script: String,
    pub kind: ScriptKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
}

impl HistoryEntry {
    fn matches(&self, needle: &str) -> bool {
        self.prompt.to_lowercase().contains(needle) || self.script.to_lowercase().contains(needle)
    }
}

#[derive(Debug, Default)]
pub struct HistoryStore {
    path: Option<PathBuf>,
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    /// In-memory store; `save` is a no-op.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed when `history.path` is configured, otherwise in memory.
    pub fn from_config(config: &HistoryConfig) -> Result<Self> {
        match &config.path {
            Some(path) => Self::open(path),
            None => Ok(Self::in_memory()),
        }
    }

    /// Opens the history file, starting empty when it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let bytes = fs::read(&path).with_context(|| format!("Failed to read history file {}", path.display()))?;
            serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse history file {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self { path: Some(path), entries })
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(&self.entries).context("Failed to serialize history")?;
        fs::write(path, json).with_context(|| format!("Failed to write history file {}", path.display()))
    }

    pub fn record(
        &mut self,
        prompt: impl Into<String>,
        script: impl Into<String>,
        kind: ScriptKind,
        entity_name: Option<String>,
    ) -> &HistoryEntry {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let entry = HistoryEntry {
            id: Uuid::new_v4(),
            timestamp,
            prompt: prompt.into(),
            script: script.into(),
            kind,
            entity_name,
        };
        let index = self.entries.len();
        self.entries.push(entry);
        &self.entries[index]
    }

    /// Case-insensitive substring search over prompt and script, newest first.
    pub fn search(&self, keyword: &str) -> Vec<&HistoryEntry> {
        let needle = keyword.trim().to_lowercase();
        self.entries.iter().rev().filter(|entry| needle.is_empty() || entry.matches(&needle)).collect()
    }

    pub fn for_kind(&self, kind: ScriptKind) -> Vec<&HistoryEntry> {
        self.entries.iter().rev().filter(|entry| entry.kind == kind).collect()
    }

    pub fn get(&self, id: Uuid) -> Option<&HistoryEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn remove(&mut self, id: Uuid) -> Option<HistoryEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
