//! Per-frame script dispatch.
//!
//! [`ScriptRuntime`] owns the rhai engine, the scene slot, one slot per loaded entity and the
//! shared host resources scripts act on. Each running-mode frame it calls the scene slot first,
//! then every entity slot in load order, one call at a time. Failures are contained per slot and
//! per frame: nothing a script does reaches the caller of [`ScriptRuntime::frame`].

pub mod bindings;
mod cache;

pub use bindings::{Api, CameraHandle, EntityHandle, InputHandle, SceneHandle, UserDataHandle};
pub use cache::{AstCache, CompiledUnit, ScriptSlot, UnitId, ENTRY_POINT};

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rhai::{Dynamic, Engine, FLOAT};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use thiserror::Error;

use crate::animation::{ActiveClip, AnimationMixer};
use crate::config::RuntimeConfig;
use crate::console::{LogEntry, LogLevel, LogSource, ScriptLog};
use crate::input::{InputEvent, InputState};
use crate::overlay::UiOverlay;
use crate::scene::{downgrade, Camera, EntityId, EntityRegistry, EntitySnapshot, LoadedModel, SceneSnapshot, SceneState};
use crate::time::{FrameClock, FrameTick};
use bindings::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotId {
    Scene,
    Entity(EntityId),
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotId::Scene => f.write_str("scene"),
            SlotId::Entity(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Editing,
    #[default]
    Running,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptError {
    #[error("{slot}: compile error: {message}")]
    Compile { slot: SlotId, message: String },
    #[error("{slot}: runtime error: {message}")]
    Runtime { slot: SlotId, message: String },
    #[error("{slot}: script panicked: {message}")]
    Panic { slot: SlotId, message: String },
}

impl ScriptError {
    pub fn slot(&self) -> SlotId {
        match self {
            ScriptError::Compile { slot, .. } | ScriptError::Runtime { slot, .. } | ScriptError::Panic { slot, .. } => {
                *slot
            }
        }
    }

    pub fn is_compile(&self) -> bool {
        matches!(self, ScriptError::Compile { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame: u64,
    pub dt: f32,
    /// False while editing: no slot was dispatched.
    pub ran: bool,
    pub compiled: Vec<SlotId>,
    pub calls: usize,
    pub errors: Vec<ScriptError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expired_ui: Vec<String>,
}

impl FrameReport {
    fn new(tick: FrameTick, ran: bool) -> Self {
        Self { frame: tick.frame, dt: tick.dt, ran, compiled: Vec::new(), calls: 0, errors: Vec::new(), expired_ui: Vec::new() }
    }

    pub fn runtime_errors(&self) -> impl Iterator<Item = &ScriptError> {
        self.errors.iter().filter(|err| !err.is_compile())
    }

    pub fn compile_errors(&self) -> impl Iterator<Item = &ScriptError> {
        self.errors.iter().filter(|err| err.is_compile())
    }

    pub fn errors_for(&self, slot: SlotId) -> usize {
        self.errors.iter().filter(|err| err.slot() == slot).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlotStats {
    pub compile_count: u64,
    pub unit: Option<UnitId>,
    pub failed: bool,
    pub update_calls: u64,
    pub runtime_errors: u64,
}

pub struct ScriptRuntime {
    engine: Engine,
    config: RuntimeConfig,
    ast_cache: AstCache,
    scene_slot: ScriptSlot,
    entity_slots: Vec<ScriptSlot>,
    host: Host,
    clock: FrameClock,
    input: InputState,
    mode: Mode,
    next_unit: u64,
}

impl ScriptRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let clock = FrameClock::new(config.clock.max_delta);
        let rng = match config.scripting.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let host = Host {
            registry: Rc::new(RefCell::new(EntityRegistry::new())),
            scene: Rc::new(RefCell::new(SceneState::default())),
            camera: Rc::new(RefCell::new(Camera::default())),
            overlay: Rc::new(RefCell::new(UiOverlay::new(config.overlay.max_elements))),
            mixer: clock.mixer(),
            log: Rc::new(RefCell::new(ScriptLog::new(config.log.capacity))),
            current_slot: Rc::new(Cell::new(None)),
            live_frame: Rc::new(Cell::new(0)),
            rng: Rc::new(RefCell::new(rng)),
        };
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        apply_limits(&mut engine, &config);
        bindings::register(&mut engine, &host);
        Self {
            engine,
            ast_cache: AstCache::new(config.scripting.ast_cache_limit),
            config,
            scene_slot: ScriptSlot::scene(String::new()),
            entity_slots: Vec::new(),
            host,
            clock,
            input: InputState::new(),
            mode: Mode::default(),
            next_unit: 0,
        }
    }

    /// Lets the embedding host register extra functions before scripts run.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switches between editing and running.
    ///
    /// Entering editing empties the overlay root. Returning to running re-validates slots whose
    /// last construction failed (and, with `recompile_on_resume`, every slot).
    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        match mode {
            Mode::Editing => {
                let removed = {
                    let mut overlay = self.host.overlay.borrow_mut();
                    let removed = overlay.len();
                    overlay.clear();
                    removed
                };
                self.host_log(LogLevel::Info, format!("editing: cleared {removed} overlay element(s)"));
            }
            Mode::Running => {
                let recompile_all = self.config.scripting.recompile_on_resume;
                let retry_failed = self.config.scripting.retry_failed_on_resume;
                let mut invalidated = 0usize;
                for slot in std::iter::once(&mut self.scene_slot).chain(self.entity_slots.iter_mut()) {
                    if recompile_all || (retry_failed && slot.failed()) {
                        slot.invalidate();
                        invalidated += 1;
                    }
                }
                if invalidated > 0 {
                    self.host_log(LogLevel::Info, format!("running: re-validating {invalidated} slot(s)"));
                }
            }
        }
    }

    pub fn load_model(&mut self, model: LoadedModel) -> EntityId {
        self.load_model_with_script(model, String::new())
    }

    pub fn load_model_with_script(&mut self, model: LoadedModel, source: impl Into<String>) -> EntityId {
        let entity = self.host.registry.borrow_mut().insert(model);
        let (id, name) = {
            let record = entity.borrow();
            (record.id, record.name.clone())
        };
        self.entity_slots.push(ScriptSlot::entity(id, downgrade(&entity), source));
        log::debug!(target: "sceneforge::scripts", "loaded '{name}' as {id}");
        id
    }

    /// Destroys the entity, its `user_data` and its slot.
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        let Some(index) = self.entity_slots.iter().position(|slot| slot.id() == SlotId::Entity(id)) else {
            return false;
        };
        self.entity_slots.remove(index);
        self.host.registry.borrow_mut().remove(id);
        if self.host.mixer.borrow_mut().stop_entity(id) {
            self.host_log(LogLevel::Info, format!("stopped animation of removed {id}"));
        }
        true
    }

    pub fn rename_entity(&mut self, id: EntityId, name: impl Into<String>) -> bool {
        match self.host.registry.borrow().get(id) {
            Some(entity) => {
                entity.borrow_mut().name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn set_scene_source(&mut self, source: impl Into<String>) -> bool {
        self.scene_slot.set_source(source)
    }

    pub fn set_entity_source(&mut self, id: EntityId, source: impl Into<String>) -> Result<bool> {
        self.set_source(SlotId::Entity(id), source)
    }

    /// Replaces a slot's text. The unit is rebuilt lazily on the slot's next dispatch, so several
    /// edits between two frames cost a single compile.
    pub fn set_source(&mut self, slot: SlotId, source: impl Into<String>) -> Result<bool> {
        match self.slot_mut(slot) {
            Some(slot) => Ok(slot.set_source(source)),
            None => bail!("no script slot for {slot}"),
        }
    }

    pub fn source(&self, slot: SlotId) -> Option<&str> {
        self.slot(slot).map(ScriptSlot::source)
    }

    pub fn invalidate(&mut self, slot: SlotId) -> bool {
        match self.slot_mut(slot) {
            Some(slot) => {
                slot.invalidate();
                true
            }
            None => false,
        }
    }

    pub fn slot(&self, slot: SlotId) -> Option<&ScriptSlot> {
        match slot {
            SlotId::Scene => Some(&self.scene_slot),
            SlotId::Entity(id) => self.entity_slots.iter().find(|s| s.id() == SlotId::Entity(id)),
        }
    }

    fn slot_mut(&mut self, slot: SlotId) -> Option<&mut ScriptSlot> {
        match slot {
            SlotId::Scene => Some(&mut self.scene_slot),
            SlotId::Entity(id) => self.entity_slots.iter_mut().find(|s| s.id() == SlotId::Entity(id)),
        }
    }

    pub fn slot_ids(&self) -> Vec<SlotId> {
        std::iter::once(SlotId::Scene).chain(self.entity_slots.iter().map(ScriptSlot::id)).collect()
    }

    pub fn slot_stats(&self, slot: SlotId) -> Option<SlotStats> {
        self.slot(slot).map(|slot| SlotStats {
            compile_count: slot.compile_count,
            unit: slot.unit().map(CompiledUnit::id),
            failed: slot.failed(),
            update_calls: slot.update_calls,
            runtime_errors: slot.runtime_errors,
        })
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    pub fn push_input(&mut self, event: InputEvent) {
        self.input.push(event);
    }

    /// Runs one frame using the wall-clock delta since the previous `tick`.
    pub fn tick(&mut self) -> FrameReport {
        let dt = self.clock.wall_delta();
        self.frame(dt)
    }

    /// Runs one frame: advances the shared mixer, fires due overlay timers and, while running,
    /// dispatches the scene slot followed by every entity slot in load order.
    pub fn frame(&mut self, dt: f32) -> FrameReport {
        let tick = self.clock.begin_frame(dt);
        self.host.live_frame.set(tick.frame);
        self.host.log.borrow_mut().set_frame(tick.frame);
        let expired_ui = self.host.overlay.borrow_mut().fire_due(tick.elapsed);

        let running = self.mode == Mode::Running;
        let mut report = FrameReport::new(tick, running);
        report.expired_ui = expired_ui;
        if !running {
            return report;
        }

        let api = Api::new(self.host.clone(), tick, tick.elapsed, Rc::new(self.input.snapshot()));
        let mut dispatcher = Dispatcher {
            engine: &self.engine,
            ast_cache: &mut self.ast_cache,
            host: &self.host,
            next_unit: &mut self.next_unit,
            report: &mut report,
        };

        let scene_target = Dynamic::from(SceneHandle::new(&self.host.scene));
        dispatcher.run(&mut self.scene_slot, scene_target, &api);

        for slot in self.entity_slots.iter_mut() {
            let Some(entity) = slot.owner().and_then(|owner| owner.upgrade()) else {
                continue;
            };
            let target = Dynamic::from(EntityHandle::new(&entity));
            drop(entity);
            dispatcher.run(slot, target, &api);
        }
        report
    }

    pub fn frame_index(&self) -> u64 {
        self.clock.frame()
    }

    pub fn entity(&self, id: EntityId) -> Option<EntitySnapshot> {
        self.host.registry.borrow().get(id).map(|entity| entity.borrow().snapshot())
    }

    pub fn entity_by_name(&self, name: &str) -> Option<EntitySnapshot> {
        self.host.registry.borrow().find_by_name(name).map(|entity| entity.borrow().snapshot())
    }

    pub fn entities(&self) -> Vec<EntitySnapshot> {
        self.host.registry.borrow().iter().map(|entity| entity.borrow().snapshot()).collect()
    }

    pub fn scene(&self) -> SceneSnapshot {
        self.host.scene.borrow().snapshot()
    }

    pub fn camera(&self) -> Camera {
        self.host.camera.borrow().clone()
    }

    pub fn overlay(&self) -> Ref<'_, UiOverlay> {
        self.host.overlay.borrow()
    }

    pub fn mixer(&self) -> Rc<RefCell<AnimationMixer>> {
        self.clock.mixer()
    }

    pub fn active_animation(&self) -> Option<ActiveClip> {
        self.host.mixer.borrow().active().cloned()
    }

    pub fn ast_cache(&self) -> &AstCache {
        &self.ast_cache
    }

    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        self.host.log.borrow_mut().take()
    }

    fn host_log(&self, level: LogLevel, message: String) {
        self.host.log.borrow_mut().push(level, LogSource::Host, message);
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

fn apply_limits(engine: &mut Engine, config: &RuntimeConfig) {
    let limits = &config.scripting;
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
}

/// Borrowed pieces of the runtime needed to run one slot.
struct Dispatcher<'a> {
    engine: &'a Engine,
    ast_cache: &'a mut AstCache,
    host: &'a Host,
    next_unit: &'a mut u64,
    report: &'a mut FrameReport,
}

impl Dispatcher<'_> {
    /// Ensures the slot's unit is current, then calls `update` once. Errors stay inside this call.
    fn run(&mut self, slot: &mut ScriptSlot, target: Dynamic, api: &Api) {
        if slot.is_blank() {
            return;
        }
        let slot_id = slot.id();
        self.host.current_slot.set(Some(slot_id));
        if slot.needs_compile() {
            self.compile(slot);
        }
        if let Some(unit) = slot.unit_mut().filter(|unit| !unit.is_noop()) {
            let engine = self.engine;
            let dt = api.dt() as FLOAT;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| unit.call(engine, target, api.clone(), dt)));
            slot.update_calls += 1;
            self.report.calls += 1;
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(ScriptError::Runtime { slot: slot_id, message: err.to_string() }),
                Err(payload) => Some(ScriptError::Panic { slot: slot_id, message: panic_message(payload.as_ref()) }),
            };
            if let Some(error) = error {
                slot.runtime_errors += 1;
                self.fail(error);
            }
        }
        self.host.current_slot.set(None);
    }

    fn compile(&mut self, slot: &mut ScriptSlot) {
        *self.next_unit += 1;
        let id = UnitId(*self.next_unit);
        let slot_id = slot.id();
        let engine = self.engine;
        let ast_cache = &mut *self.ast_cache;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| cache::rebuild(engine, ast_cache, slot, id)));
        self.report.compiled.push(slot_id);
        match outcome {
            Ok(Ok(())) => {
                self.host.log(LogLevel::Info, format!("compiled {id}"));
            }
            Ok(Err(message)) => self.fail(ScriptError::Compile { slot: slot_id, message }),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                cache::fail(slot, id, message.clone());
                self.fail(ScriptError::Compile { slot: slot_id, message });
            }
        }
    }

    fn fail(&mut self, error: ScriptError) {
        let message = match &error {
            ScriptError::Compile { message, .. } => format!("compile error: {message}"),
            ScriptError::Runtime { message, .. } => format!("runtime error: {message}"),
            ScriptError::Panic { message, .. } => format!("script panicked: {message}"),
        };
        self.host.log(LogLevel::Error, message);
        self.report.errors.push(error);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
