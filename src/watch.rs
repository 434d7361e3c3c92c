use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

use crate::scripts::SlotId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSourceChange {
    pub path: PathBuf,
    pub slot: SlotId,
}

/// Watches script files on disk and reports which slot each change belongs to.
pub struct ScriptSourceWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    registrations: Vec<(PathBuf, SlotId)>,
}

impl ScriptSourceWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .configure(NotifyConfig::default().with_compare_contents(false).with_poll_interval(Duration::from_millis(250)))
            .context("configure script watcher")?;
        Ok(Self { watcher, rx, registrations: Vec::new() })
    }

    pub fn watch_script(&mut self, path: impl AsRef<Path>, slot: SlotId) -> Result<()> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("script '{}' does not exist", path.display());
        }
        let normalized = normalize_watch_path(path);
        if let Some(entry) = self.registrations.iter_mut().find(|(existing, _)| *existing == normalized) {
            entry.1 = slot;
            return Ok(());
        }
        self.watcher
            .watch(&normalized, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", normalized.display()))?;
        self.registrations.push((normalized, slot));
        Ok(())
    }

    pub fn watched(&self) -> usize {
        self.registrations.len()
    }

    /// Collects pending change events. A path reported twice in one drain is returned once.
    pub fn drain_changes(&mut self) -> Vec<ScriptSourceChange> {
        let mut changes: Vec<ScriptSourceChange> = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) => {
                    if !is_relevant(&event.kind) {
                        continue;
                    }
                    for path in event.paths {
                        let Some(slot) = self.slot_for_path(&path) else {
                            continue;
                        };
                        if !changes.iter().any(|change| change.path == path) {
                            changes.push(ScriptSourceChange { path, slot });
                        }
                    }
                }
                Err(err) => log::warn!(target: "sceneforge::watch", "script watcher error: {err}"),
            }
        }
        changes
    }

    fn slot_for_path(&self, path: &Path) -> Option<SlotId> {
        let normalized = normalize_watch_path(path);
        self.registrations.iter().find(|(registered, _)| *registered == normalized).map(|(_, slot)| *slot)
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Create(_)
    )
}

fn normalize_watch_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    match fs::canonicalize(&absolute) {
        Ok(canonical) => canonical,
        Err(_) => match (absolute.parent().and_then(|parent| fs::canonicalize(parent).ok()), absolute.file_name()) {
            (Some(parent), Some(name)) => parent.join(name),
            _ => absolute,
        },
    }
}
