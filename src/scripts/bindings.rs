//! Host capabilities exposed to scripts.
//!
//! Every `update` call receives `(target, api, dt)`. `target` is a [`SceneHandle`] for the scene
//! slot and an [`EntityHandle`] for entity slots; `api` is the per-frame [`Api`] object, identical
//! in shape for both. Lookups that miss return `()` and log a diagnostic; the host never throws for
//! them.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::Rng;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Position, FLOAT, INT};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::animation::AnimationMixer;
use crate::console::{LogLevel, LogSource, ScriptLog};
use crate::input::InputSnapshot;
use crate::overlay::UiOverlay;
use crate::scene::{Camera, EntityId, EntityRecord, EntityRegistry, SceneState, SharedEntity};
use crate::scripts::SlotId;
use crate::time::FrameTick;
use crate::value::{UserData, UserValue};

/// Shared host resources reachable from scripts.
#[derive(Clone)]
pub(crate) struct Host {
    pub registry: Rc<RefCell<EntityRegistry>>,
    pub scene: Rc<RefCell<SceneState>>,
    pub camera: Rc<RefCell<Camera>>,
    pub overlay: Rc<RefCell<UiOverlay>>,
    pub mixer: Rc<RefCell<AnimationMixer>>,
    pub log: Rc<RefCell<ScriptLog>>,
    pub current_slot: Rc<Cell<Option<SlotId>>>,
    pub live_frame: Rc<Cell<u64>>,
    pub rng: Rc<RefCell<StdRng>>,
}

impl Host {
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let source = self.current_slot.get().map(LogSource::Slot).unwrap_or(LogSource::Host);
        self.log.borrow_mut().push(level, source, message);
    }
}

#[derive(Clone)]
pub struct EntityHandle {
    id: EntityId,
    record: Weak<RefCell<EntityRecord>>,
}

impl EntityHandle {
    pub(crate) fn new(entity: &SharedEntity) -> Self {
        Self { id: entity.borrow().id, record: Rc::downgrade(entity) }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    fn read<R>(&self, f: impl FnOnce(&EntityRecord) -> R) -> Option<R> {
        self.record.upgrade().map(|record| f(&record.borrow()))
    }

    fn write(&self, f: impl FnOnce(&mut EntityRecord)) {
        if let Some(record) = self.record.upgrade() {
            f(&mut record.borrow_mut());
        }
    }
}

#[derive(Clone)]
pub struct SceneHandle {
    state: Weak<RefCell<SceneState>>,
}

impl SceneHandle {
    pub(crate) fn new(state: &Rc<RefCell<SceneState>>) -> Self {
        Self { state: Rc::downgrade(state) }
    }

    fn read<R>(&self, f: impl FnOnce(&SceneState) -> R) -> Option<R> {
        self.state.upgrade().map(|state| f(&state.borrow()))
    }

    fn write(&self, f: impl FnOnce(&mut SceneState)) {
        if let Some(state) = self.state.upgrade() {
            f(&mut state.borrow_mut());
        }
    }
}

#[derive(Clone)]
pub struct CameraHandle {
    camera: Rc<RefCell<Camera>>,
}

#[derive(Clone)]
enum StoreRef {
    Entity(Weak<RefCell<EntityRecord>>),
    Scene(Weak<RefCell<SceneState>>),
}

/// Script view of a `user_data` store; reads and writes go straight to the owner.
#[derive(Clone)]
pub struct UserDataHandle {
    store: StoreRef,
}

impl UserDataHandle {
    fn read<R>(&self, f: impl FnOnce(&UserData) -> R) -> Option<R> {
        match &self.store {
            StoreRef::Entity(record) => record.upgrade().map(|record| f(&record.borrow().user_data)),
            StoreRef::Scene(state) => state.upgrade().map(|state| f(&state.borrow().user_data)),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut UserData) -> R) -> Option<R> {
        match &self.store {
            StoreRef::Entity(record) => record.upgrade().map(|record| f(&mut record.borrow_mut().user_data)),
            StoreRef::Scene(state) => state.upgrade().map(|state| f(&mut state.borrow_mut().user_data)),
        }
    }

    fn get(&self, key: &str) -> Dynamic {
        self.read(|data| data.get(key).map(UserValue::to_dynamic)).flatten().unwrap_or(Dynamic::UNIT)
    }

    fn set(&self, key: &str, value: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let value = UserValue::from_dynamic(&value).map_err(|err| -> Box<EvalAltResult> { err.to_string().into() })?;
        self.write(|data| data.set(key, value));
        Ok(())
    }
}

#[derive(Clone)]
pub struct InputHandle(Rc<InputSnapshot>);

struct ApiFrame {
    host: Host,
    frame: u64,
    dt: f32,
    elapsed: f64,
    input: InputHandle,
}

/// Per-frame capability object. Only valid during the frame it was built for.
#[derive(Clone)]
pub struct Api(Rc<ApiFrame>);

impl Api {
    pub(crate) fn new(host: Host, tick: FrameTick, elapsed: f64, input: Rc<InputSnapshot>) -> Self {
        Self(Rc::new(ApiFrame { host, frame: tick.frame, dt: tick.dt, elapsed, input: InputHandle(input) }))
    }

    pub fn frame(&self) -> u64 {
        self.0.frame
    }

    pub fn dt(&self) -> f32 {
        self.0.dt
    }

    fn host(&self) -> &Host {
        &self.0.host
    }

    /// A capability object retained past its frame is refused.
    fn live(&self, capability: &str) -> bool {
        let current = self.0.host.live_frame.get();
        if current == self.0.frame {
            return true;
        }
        self.host().log(
            LogLevel::Warn,
            format!("{capability}: capability object from frame {} used in frame {current}; ignored", self.0.frame),
        );
        false
    }

    fn find(&self, name: &str) -> Option<SharedEntity> {
        self.host().registry.borrow().find_by_name(name)
    }

    fn find_entity(&mut self, name: &str) -> Dynamic {
        if !self.live("find") {
            return Dynamic::UNIT;
        }
        match self.find(name) {
            Some(entity) => Dynamic::from(EntityHandle::new(&entity)),
            None => Dynamic::UNIT,
        }
    }

    fn entity_names(&mut self) -> Array {
        if !self.live("entities") {
            return Array::new();
        }
        self.host().registry.borrow().names().into_iter().map(Dynamic::from).collect()
    }

    fn animations(&mut self, name: &str) -> Array {
        if !self.live("animations") {
            return Array::new();
        }
        let Some(entity) = self.find(name) else {
            return Array::new();
        };
        let record = entity.borrow();
        record
            .clips
            .iter()
            .map(|clip| {
                let mut map = Map::new();
                map.insert("name".into(), clip.name.clone().into());
                map.insert("duration".into(), (clip.duration as FLOAT).into());
                map.insert("looped".into(), clip.looped.into());
                Dynamic::from_map(map)
            })
            .collect()
    }

    fn play_animation(&mut self, entity_name: &str, clip_name: &str) -> bool {
        if !self.live("play_animation") {
            return false;
        }
        let Some(entity) = self.find(entity_name) else {
            self.host().log(LogLevel::Warn, format!("play_animation: no entity named '{entity_name}'"));
            return false;
        };
        let record = entity.borrow();
        let Some(clip) = record.clip(clip_name) else {
            self.host().log(LogLevel::Warn, format!("play_animation: '{entity_name}' has no clip '{clip_name}'"));
            return false;
        };
        self.host().mixer.borrow_mut().play(record.id, &record.name, clip);
        true
    }

    fn stop_animation(&mut self) -> bool {
        if !self.live("stop_animation") {
            return false;
        }
        self.host().mixer.borrow_mut().stop().is_some()
    }

    fn current_animation(&mut self) -> Dynamic {
        if !self.live("current_animation") {
            return Dynamic::UNIT;
        }
        let mixer = self.host().mixer.borrow();
        let Some(active) = mixer.active() else {
            return Dynamic::UNIT;
        };
        let mut map = Map::new();
        map.insert("entity".into(), active.entity_name.clone().into());
        map.insert("clip".into(), active.clip.clone().into());
        map.insert("time".into(), (active.time as FLOAT).into());
        map.insert("finished".into(), active.finished.into());
        Dynamic::from_map(map)
    }

    fn create_ui(&mut self, markup: &str) {
        if !self.live("create_ui") {
            return;
        }
        let result = self.host().overlay.borrow_mut().create_from_markup(markup);
        match result {
            Ok(None) => {}
            Ok(Some(evicted)) => self.host().log(
                LogLevel::Warn,
                format!("create_ui: overlay full; dropped oldest <{}> element", evicted.tag),
            ),
            Err(err) => self.host().log(LogLevel::Warn, format!("create_ui: {err}")),
        }
    }

    fn remove_ui(&mut self, id: &str) -> bool {
        if !self.live("remove_ui") {
            return false;
        }
        self.host().overlay.borrow_mut().remove_by_id(id)
    }

    fn remove_ui_after(&mut self, id: &str, seconds: FLOAT) {
        if !self.live("remove_ui_after") {
            return;
        }
        let now = self.0.elapsed;
        self.host().overlay.borrow_mut().schedule_removal(id, now, seconds);
    }

    fn has_ui(&mut self, id: &str) -> bool {
        if !self.live("has_ui") {
            return false;
        }
        self.host().overlay.borrow().contains_id(id)
    }

    fn random(&mut self, min: FLOAT, max: FLOAT) -> FLOAT {
        if !self.live("random") || !(min < max) {
            return min;
        }
        self.host().rng.borrow_mut().gen_range(min..max)
    }
}

pub(crate) fn register(engine: &mut Engine, host: &Host) {
    register_output(engine, host);
    register_vec3(engine);
    register_entity(engine);
    register_scene(engine);
    register_camera(engine);
    register_user_data(engine);
    register_input(engine);
    register_api(engine);
}

fn register_output(engine: &mut Engine, host: &Host) {
    let print_host = host.clone();
    engine.on_print(move |text| print_host.log(LogLevel::Info, text));
    let debug_host = host.clone();
    engine.on_debug(move |text, _source, pos: Position| {
        if pos.is_none() {
            debug_host.log(LogLevel::Info, text);
        } else {
            debug_host.log(LogLevel::Info, format!("{text} ({pos})"));
        }
    });
}

fn to_f32(value: FLOAT) -> f32 {
    value as f32
}

fn register_vec3(engine: &mut Engine) {
    engine
        .register_type_with_name::<Vec3>("Vec3")
        .register_fn("vec3", |x: FLOAT, y: FLOAT, z: FLOAT| Vec3::new(to_f32(x), to_f32(y), to_f32(z)))
        .register_fn("vec3", |x: INT, y: INT, z: INT| Vec3::new(x as f32, y as f32, z as f32))
        .register_get_set("x", |v: &mut Vec3| v.x as FLOAT, |v: &mut Vec3, x: FLOAT| v.x = to_f32(x))
        .register_get_set("y", |v: &mut Vec3| v.y as FLOAT, |v: &mut Vec3, y: FLOAT| v.y = to_f32(y))
        .register_get_set("z", |v: &mut Vec3| v.z as FLOAT, |v: &mut Vec3, z: FLOAT| v.z = to_f32(z))
        .register_set("x", |v: &mut Vec3, x: INT| v.x = x as f32)
        .register_set("y", |v: &mut Vec3, y: INT| v.y = y as f32)
        .register_set("z", |v: &mut Vec3, z: INT| v.z = z as f32)
        .register_fn("+", |a: Vec3, b: Vec3| a + b)
        .register_fn("-", |a: Vec3, b: Vec3| a - b)
        .register_fn("-", |a: Vec3| -a)
        .register_fn("*", |a: Vec3, s: FLOAT| a * to_f32(s))
        .register_fn("*", |s: FLOAT, a: Vec3| a * to_f32(s))
        .register_fn("*", |a: Vec3, s: INT| a * s as f32)
        .register_fn("/", |a: Vec3, s: FLOAT| a / to_f32(s))
        .register_fn("==", |a: Vec3, b: Vec3| a == b)
        .register_fn("!=", |a: Vec3, b: Vec3| a != b)
        .register_fn("length", |v: &mut Vec3| v.length() as FLOAT)
        .register_fn("normalized", |v: &mut Vec3| v.normalize_or_zero())
        .register_fn("dot", |a: &mut Vec3, b: Vec3| a.dot(b) as FLOAT)
        .register_fn("cross", |a: &mut Vec3, b: Vec3| a.cross(b))
        .register_fn("distance", |a: &mut Vec3, b: Vec3| a.distance(b) as FLOAT)
        .register_fn("lerp", |a: &mut Vec3, b: Vec3, t: FLOAT| a.lerp(b, to_f32(t)))
        .register_fn("to_string", |v: &mut Vec3| format!("({:.3}, {:.3}, {:.3})", v.x, v.y, v.z))
        .register_fn("to_debug", |v: &mut Vec3| format!("vec3({}, {}, {})", v.x, v.y, v.z));
}

fn register_entity(engine: &mut Engine) {
    engine
        .register_type_with_name::<EntityHandle>("Entity")
        .register_get("id", |e: &mut EntityHandle| e.id.0 as INT)
        .register_get("alive", |e: &mut EntityHandle| e.record.upgrade().is_some())
        .register_get_set(
            "name",
            |e: &mut EntityHandle| e.read(|r| r.name.clone()).unwrap_or_default(),
            |e: &mut EntityHandle, name: String| e.write(|r| r.name = name),
        )
        .register_get_set(
            "position",
            |e: &mut EntityHandle| e.read(|r| r.transform.position).unwrap_or(Vec3::ZERO),
            |e: &mut EntityHandle, v: Vec3| e.write(|r| r.transform.position = v),
        )
        .register_get_set(
            "rotation",
            |e: &mut EntityHandle| e.read(|r| r.transform.rotation).unwrap_or(Vec3::ZERO),
            |e: &mut EntityHandle, v: Vec3| e.write(|r| r.transform.rotation = v),
        )
        .register_get_set(
            "scale",
            |e: &mut EntityHandle| e.read(|r| r.transform.scale).unwrap_or(Vec3::ONE),
            |e: &mut EntityHandle, v: Vec3| e.write(|r| r.transform.scale = v),
        )
        .register_get_set(
            "visible",
            |e: &mut EntityHandle| e.read(|r| r.visible).unwrap_or(false),
            |e: &mut EntityHandle, visible: bool| e.write(|r| r.visible = visible),
        )
        .register_get("user_data", |e: &mut EntityHandle| UserDataHandle { store: StoreRef::Entity(e.record.clone()) })
        .register_fn("set_position", |e: &mut EntityHandle, x: FLOAT, y: FLOAT, z: FLOAT| {
            e.write(|r| r.transform.position = Vec3::new(to_f32(x), to_f32(y), to_f32(z)))
        })
        .register_fn("set_rotation", |e: &mut EntityHandle, x: FLOAT, y: FLOAT, z: FLOAT| {
            e.write(|r| r.transform.rotation = Vec3::new(to_f32(x), to_f32(y), to_f32(z)))
        })
        .register_fn("set_scale", |e: &mut EntityHandle, s: FLOAT| e.write(|r| r.transform.scale = Vec3::splat(to_f32(s))))
        .register_fn("translate", |e: &mut EntityHandle, x: FLOAT, y: FLOAT, z: FLOAT| {
            e.write(|r| r.transform.position += Vec3::new(to_f32(x), to_f32(y), to_f32(z)))
        })
        .register_fn("rotate", |e: &mut EntityHandle, x: FLOAT, y: FLOAT, z: FLOAT| {
            e.write(|r| r.transform.rotation += Vec3::new(to_f32(x), to_f32(y), to_f32(z)))
        })
        .register_fn("look_at", |e: &mut EntityHandle, target: Vec3| {
            e.write(|r| {
                let dir = target - r.transform.position;
                if dir.x != 0.0 || dir.z != 0.0 {
                    r.transform.rotation.y = dir.x.atan2(dir.z);
                }
            })
        })
        .register_fn("==", |a: EntityHandle, b: EntityHandle| a.id == b.id)
        .register_fn("!=", |a: EntityHandle, b: EntityHandle| a.id != b.id)
        .register_fn("to_string", |e: &mut EntityHandle| {
            e.read(|r| format!("Entity({})", r.name)).unwrap_or_else(|| format!("Entity(<removed {}>)", e.id))
        });
}

fn register_scene(engine: &mut Engine) {
    engine
        .register_type_with_name::<SceneHandle>("Scene")
        .register_get_set(
            "background",
            |s: &mut SceneHandle| s.read(|state| state.background).unwrap_or(Vec3::ZERO),
            |s: &mut SceneHandle, color: Vec3| s.write(|state| state.background = color),
        )
        .register_fn("set_background", |s: &mut SceneHandle, r: FLOAT, g: FLOAT, b: FLOAT| {
            s.write(|state| state.background = Vec3::new(to_f32(r), to_f32(g), to_f32(b)))
        })
        .register_get_set(
            "ambient_intensity",
            |s: &mut SceneHandle| s.read(|state| state.ambient_intensity as FLOAT).unwrap_or(0.0),
            |s: &mut SceneHandle, value: FLOAT| s.write(|state| state.ambient_intensity = to_f32(value)),
        )
        .register_get_set(
            "sun_intensity",
            |s: &mut SceneHandle| s.read(|state| state.sun_intensity as FLOAT).unwrap_or(0.0),
            |s: &mut SceneHandle, value: FLOAT| s.write(|state| state.sun_intensity = to_f32(value)),
        )
        .register_get_set(
            "fog_density",
            |s: &mut SceneHandle| s.read(|state| state.fog_density as FLOAT).unwrap_or(0.0),
            |s: &mut SceneHandle, value: FLOAT| s.write(|state| state.fog_density = to_f32(value)),
        )
        .register_get("user_data", |s: &mut SceneHandle| UserDataHandle { store: StoreRef::Scene(s.state.clone()) })
        .register_fn("to_string", |_: &mut SceneHandle| "Scene".to_string());
}

fn register_camera(engine: &mut Engine) {
    engine
        .register_type_with_name::<CameraHandle>("Camera")
        .register_get_set(
            "position",
            |c: &mut CameraHandle| c.camera.borrow().position,
            |c: &mut CameraHandle, v: Vec3| c.camera.borrow_mut().position = v,
        )
        .register_get_set(
            "rotation",
            |c: &mut CameraHandle| c.camera.borrow().rotation,
            |c: &mut CameraHandle, v: Vec3| c.camera.borrow_mut().rotation = v,
        )
        .register_get_set(
            "fov",
            |c: &mut CameraHandle| c.camera.borrow().fov as FLOAT,
            |c: &mut CameraHandle, fov: FLOAT| c.camera.borrow_mut().fov = to_f32(fov).clamp(1.0, 179.0),
        )
        .register_fn("look_at", |c: &mut CameraHandle, target: Vec3| c.camera.borrow_mut().look_at(target))
        .register_fn("to_string", |c: &mut CameraHandle| {
            let camera = c.camera.borrow();
            format!("Camera(position: {:?}, fov: {})", camera.position.to_array(), camera.fov)
        });
}

fn register_user_data(engine: &mut Engine) {
    engine
        .register_type_with_name::<UserDataHandle>("UserData")
        .register_indexer_get(|d: &mut UserDataHandle, key: ImmutableString| d.get(&key))
        .register_indexer_set(|d: &mut UserDataHandle, key: ImmutableString, value: Dynamic| d.set(&key, value))
        .register_fn("get", |d: &mut UserDataHandle, key: &str, default: Dynamic| {
            let value = d.get(key);
            if value.is_unit() {
                default
            } else {
                value
            }
        })
        .register_fn("set", |d: &mut UserDataHandle, key: &str, value: Dynamic| d.set(key, value))
        .register_fn("contains", |d: &mut UserDataHandle, key: &str| d.read(|data| data.contains(key)).unwrap_or(false))
        .register_fn("remove", |d: &mut UserDataHandle, key: &str| {
            d.write(|data| data.remove(key)).flatten().map(|value| value.to_dynamic()).unwrap_or(Dynamic::UNIT)
        })
        .register_fn("keys", |d: &mut UserDataHandle| -> Array {
            d.read(|data| data.keys().map(|key| Dynamic::from(key.to_string())).collect()).unwrap_or_default()
        })
        .register_fn("len", |d: &mut UserDataHandle| d.read(|data| data.len() as INT).unwrap_or(0));
}

fn register_input(engine: &mut Engine) {
    engine
        .register_type_with_name::<InputHandle>("Input")
        .register_fn("is_key_down", |i: &mut InputHandle, key: &str| i.0.is_key_down(key))
        .register_fn("is_button_down", |i: &mut InputHandle, button: INT| i.0.is_button_down(button))
        .register_get("keys", |i: &mut InputHandle| -> Array {
            i.0.keys().map(|key| Dynamic::from(key.to_string())).collect()
        })
        .register_get("pointer_x", |i: &mut InputHandle| i.0.pointer.0 as FLOAT)
        .register_get("pointer_y", |i: &mut InputHandle| i.0.pointer.1 as FLOAT)
        .register_get("buttons", |i: &mut InputHandle| i.0.buttons.bits() as INT);
}

fn register_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<Api>("Api")
        .register_fn("find", Api::find_entity)
        .register_fn("entities", Api::entity_names)
        .register_fn("animations", Api::animations)
        .register_fn("play_animation", Api::play_animation)
        .register_fn("stop_animation", Api::stop_animation)
        .register_fn("current_animation", Api::current_animation)
        .register_fn("create_ui", Api::create_ui)
        .register_fn("remove_ui", Api::remove_ui)
        .register_fn("remove_ui_after", Api::remove_ui_after)
        .register_fn("remove_ui_after", |api: &mut Api, id: &str, seconds: INT| api.remove_ui_after(id, seconds as FLOAT))
        .register_fn("has_ui", Api::has_ui)
        .register_fn("random", Api::random)
        .register_fn("log", |api: &mut Api, value: Dynamic| api.host().log(LogLevel::Info, value.to_string()))
        .register_fn("warn", |api: &mut Api, value: Dynamic| api.host().log(LogLevel::Warn, value.to_string()))
        .register_get("input", |api: &mut Api| api.0.input.clone())
        .register_get("dt", |api: &mut Api| api.0.dt as FLOAT)
        .register_get("time", |api: &mut Api| api.0.elapsed as FLOAT)
        .register_get("frame", |api: &mut Api| api.0.frame as INT)
        .register_get("camera", |api: &mut Api| CameraHandle { camera: Rc::clone(&api.0.host.camera) })
        .register_get("scene", |api: &mut Api| SceneHandle::new(&api.0.host.scene));
}
