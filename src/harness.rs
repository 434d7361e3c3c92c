//! Headless fixture runner: loads a scene description from JSON, drives the runtime for a fixed
//! number of frames and summarises what the scripts did.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::animation::{ActiveClip, AnimationClip};
use crate::config::RuntimeConfig;
use crate::console::LogEntry;
use crate::input::InputEvent;
use crate::scene::{EntitySnapshot, LoadedModel, SceneSnapshot, Transform};
use crate::scripts::{Mode, ScriptError, ScriptRuntime, SlotId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    #[serde(default)]
    pub scene: ScriptSource,
    #[serde(default)]
    pub entities: Vec<FixtureEntity>,
    #[serde(default = "default_frames")]
    pub frames: usize,
    /// Seconds per frame; the configured `clock.default_dt` when absent.
    #[serde(default)]
    pub dt: Option<f32>,
    #[serde(default)]
    pub events: Vec<FrameEvents>,
}

/// Script text given inline or as a path relative to the fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScriptSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureEntity {
    pub name: String,
    #[serde(flatten)]
    pub source: ScriptSource,
    #[serde(default)]
    pub position: Option<[f32; 3]>,
    #[serde(default)]
    pub rotation: Option<[f32; 3]>,
    #[serde(default)]
    pub scale: Option<[f32; 3]>,
    #[serde(default)]
    pub clips: Vec<AnimationClip>,
}

/// Host activity applied just before the given (1-based) frame runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameEvents {
    pub frame: u64,
    #[serde(default)]
    pub input: Vec<InputEvent>,
    #[serde(default)]
    pub edits: Vec<SourceEdit>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceEdit {
    /// `"scene"` or an entity name.
    pub target: String,
    pub script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub frames: usize,
    pub dt: f32,
    pub results: Vec<FrameResult>,
    pub final_entities: Vec<EntitySnapshot>,
    pub scene: SceneSnapshot,
    pub overlay: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_animation: Option<ActiveClip>,
}

impl HarnessOutput {
    pub fn total_errors(&self) -> usize {
        self.results.iter().map(|result| result.errors.len()).sum()
    }

    pub fn entity(&self, name: &str) -> Option<&EntitySnapshot> {
        self.final_entities.iter().find(|entity| entity.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameResult {
    pub frame: u64,
    pub ran: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compiled: Vec<SlotId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ScriptError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

/// A runtime populated from a fixture, plus the script files it was loaded from.
pub struct HarnessSession {
    runtime: ScriptRuntime,
    fixture: HarnessFixture,
    script_files: Vec<(PathBuf, SlotId)>,
    dt: f32,
}

impl HarnessSession {
    pub fn new(fixture: HarnessFixture, base_dir: &Path, config: RuntimeConfig) -> Result<Self> {
        let dt = fixture.dt.unwrap_or(config.clock.default_dt);
        if !dt.is_finite() || dt < 0.0 {
            bail!("fixture dt must be a non-negative number of seconds, got {dt}");
        }
        let mut runtime = ScriptRuntime::new(config);
        let mut script_files = Vec::new();

        if let Some((text, path)) = resolve_source(&fixture.scene, base_dir).context("loading scene script")? {
            runtime.set_scene_source(text);
            if let Some(path) = path {
                script_files.push((path, SlotId::Scene));
            }
        }
        for entity in &fixture.entities {
            let mut transform = Transform::default();
            if let Some(position) = entity.position {
                transform.position = Vec3::from_array(position);
            }
            if let Some(rotation) = entity.rotation {
                transform.rotation = Vec3::from_array(rotation);
            }
            if let Some(scale) = entity.scale {
                transform.scale = Vec3::from_array(scale);
            }
            let mut model = LoadedModel::new(entity.name.clone()).with_transform(transform);
            model.clips = entity.clips.clone();
            let source = resolve_source(&entity.source, base_dir)
                .with_context(|| format!("loading script for entity '{}'", entity.name))?;
            let (text, path) = source.unwrap_or_default();
            let id = runtime.load_model_with_script(model, text);
            if let Some(path) = path {
                script_files.push((path, SlotId::Entity(id)));
            }
        }
        Ok(Self { runtime, fixture, script_files, dt })
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut ScriptRuntime {
        &mut self.runtime
    }

    pub fn script_files(&self) -> &[(PathBuf, SlotId)] {
        &self.script_files
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Runs every fixture frame, applying scheduled events first.
    pub fn run(&mut self) -> HarnessOutput {
        let mut results = Vec::with_capacity(self.fixture.frames);
        for _ in 0..self.fixture.frames {
            results.push(self.step());
        }
        self.summary(results)
    }

    /// Runs a single frame and reports it.
    pub fn step(&mut self) -> FrameResult {
        let upcoming = self.runtime.frame_index() + 1;
        let events: Vec<FrameEvents> =
            self.fixture.events.iter().filter(|events| events.frame == upcoming).cloned().collect();
        for events in events {
            self.apply(events);
        }
        let report = self.runtime.frame(self.dt);
        FrameResult {
            frame: report.frame,
            ran: report.ran,
            compiled: report.compiled,
            errors: report.errors,
            logs: self.runtime.take_logs(),
        }
    }

    pub fn summary(&self, results: Vec<FrameResult>) -> HarnessOutput {
        HarnessOutput {
            frames: results.len(),
            dt: self.dt,
            results,
            final_entities: self.runtime.entities(),
            scene: self.runtime.scene(),
            overlay: self.runtime.overlay().render_markup(),
            active_animation: self.runtime.active_animation(),
        }
    }

    fn apply(&mut self, events: FrameEvents) {
        for event in events.input {
            self.runtime.push_input(event);
        }
        for edit in events.edits {
            match self.slot_for(&edit.target) {
                Some(slot) => {
                    if let Err(err) = self.runtime.set_source(slot, edit.script) {
                        log::warn!(target: "sceneforge::harness", "edit for '{}' ignored: {err}", edit.target);
                    }
                }
                None => log::warn!(target: "sceneforge::harness", "edit targets unknown slot '{}'", edit.target),
            }
        }
        for name in events.remove {
            match self.runtime.entity_by_name(&name) {
                Some(entity) => {
                    self.runtime.remove_entity(entity.id);
                }
                None => log::warn!(target: "sceneforge::harness", "cannot remove unknown entity '{name}'"),
            }
        }
        if let Some(mode) = events.mode {
            self.runtime.set_mode(mode);
        }
    }

    fn slot_for(&self, target: &str) -> Option<SlotId> {
        if target.eq_ignore_ascii_case("scene") {
            return Some(SlotId::Scene);
        }
        self.runtime.entity_by_name(target).map(|entity| SlotId::Entity(entity.id))
    }
}

pub fn run_fixture(fixture: &HarnessFixture, base_dir: &Path, config: RuntimeConfig) -> Result<HarnessOutput> {
    let mut session = HarnessSession::new(fixture.clone(), base_dir, config)?;
    Ok(session.run())
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let file = File::open(path.as_ref()).with_context(|| format!("opening fixture '{}'", path.as_ref().display()))?;
    serde_json::from_reader(file).with_context(|| "parsing fixture JSON")
}

/// Directory that relative `script_path`s in a fixture file resolve against.
pub fn fixture_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn resolve_source(source: &ScriptSource, base_dir: &Path) -> Result<Option<(String, Option<PathBuf>)>> {
    match (&source.script, &source.script_path) {
        (Some(_), Some(_)) => bail!("give either `script` or `script_path`, not both"),
        (Some(text), None) => Ok(Some((text.clone(), None))),
        (None, Some(path)) => {
            let path = if path.is_absolute() { path.clone() } else { base_dir.join(path) };
            let text = fs::read_to_string(&path).with_context(|| format!("reading script '{}'", path.display()))?;
            Ok(Some((text, Some(path))))
        }
        (None, None) => Ok(None),
    }
}

fn default_frames() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_defaults_apply() {
        let fixture: HarnessFixture =
            serde_json::from_str(r#"{ "entities": [{ "name": "Cube", "script": "fn update(t, a, dt) {}" }] }"#)
                .expect("parse fixture");
        assert_eq!(fixture.frames, 3);
        assert!(fixture.dt.is_none());
        assert_eq!(fixture.entities[0].source.script.as_deref(), Some("fn update(t, a, dt) {}"));
        assert!(fixture.scene.script.is_none());
    }

    #[test]
    fn both_inline_and_path_is_rejected() {
        let source = ScriptSource { script: Some("x".into()), script_path: Some("x.rhai".into()) };
        let err = resolve_source(&source, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("either"));
    }
}
