use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::animation::AnimationClip;
use crate::value::UserData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in radians (XYZ order).
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self { position: Vec3::ZERO, rotation: Vec3::ZERO, scale: Vec3::ONE }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self { position, ..Self::default() }
    }
}

/// What the model loader hands over for every loaded file.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub name: String,
    pub transform: Transform,
    pub clips: Vec<AnimationClip>,
}

impl LoadedModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), transform: Transform::default(), clips: Vec::new() }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_clip(mut self, clip: AnimationClip) -> Self {
        self.clips.push(clip);
        self
    }
}

#[derive(Debug)]
pub struct EntityRecord {
    pub id: EntityId,
    pub name: String,
    pub transform: Transform,
    pub visible: bool,
    pub user_data: UserData,
    pub clips: Vec<AnimationClip>,
}

impl EntityRecord {
    pub fn clip(&self, name: &str) -> Option<&AnimationClip> {
        self.clips.iter().find(|clip| clip.name == name)
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            id: self.id,
            name: self.name.clone(),
            position: self.transform.position.to_array(),
            rotation: self.transform.rotation.to_array(),
            scale: self.transform.scale.to_array(),
            visible: self.visible,
            user_data: self.user_data.clone(),
        }
    }
}

pub type SharedEntity = Rc<RefCell<EntityRecord>>;

/// Loaded entities in load order. Lookups are linear; scenes hold tens of models, not thousands.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: Vec<SharedEntity>,
    next_id: u64,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: LoadedModel) -> SharedEntity {
        self.next_id += 1;
        let record = Rc::new(RefCell::new(EntityRecord {
            id: EntityId(self.next_id),
            name: model.name,
            transform: model.transform,
            visible: true,
            user_data: UserData::new(),
            clips: model.clips,
        }));
        self.entities.push(Rc::clone(&record));
        record
    }

    pub fn remove(&mut self, id: EntityId) -> Option<SharedEntity> {
        let index = self.entities.iter().position(|entity| entity.borrow().id == id)?;
        Some(self.entities.remove(index))
    }

    pub fn get(&self, id: EntityId) -> Option<SharedEntity> {
        self.entities.iter().find(|entity| entity.borrow().id == id).cloned()
    }

    /// First entity (in load order) whose current name matches.
    pub fn find_by_name(&self, name: &str) -> Option<SharedEntity> {
        self.entities.iter().find(|entity| entity.borrow().name == name).cloned()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|entity| entity.borrow().id).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entities.iter().map(|entity| entity.borrow().name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedEntity> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

pub fn downgrade(entity: &SharedEntity) -> Weak<RefCell<EntityRecord>> {
    Rc::downgrade(entity)
}

/// Scene-level properties the render layer reads every frame.
#[derive(Debug, Clone)]
pub struct SceneState {
    pub background: Vec3,
    pub ambient_intensity: f32,
    pub sun_intensity: f32,
    pub fog_density: f32,
    pub user_data: UserData,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            background: Vec3::new(0.1, 0.1, 0.12),
            ambient_intensity: 0.4,
            sun_intensity: 1.0,
            fog_density: 0.0,
            user_data: UserData::new(),
        }
    }
}

impl SceneState {
    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            background: self.background.to_array(),
            ambient_intensity: self.ambient_intensity,
            sun_intensity: self.sun_intensity,
            fog_density: self.fog_density,
            user_data: self.user_data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self { position: Vec3::new(0.0, 2.0, 6.0), rotation: Vec3::ZERO, fov: 60.0 }
    }
}

impl Camera {
    /// Points the camera at `target` by recomputing yaw (Y) and pitch (X).
    pub fn look_at(&mut self, target: Vec3) {
        let dir = target - self.position;
        if dir.length_squared() <= f32::EPSILON {
            return;
        }
        let dir = dir.normalize();
        let yaw = (-dir.x).atan2(-dir.z);
        let pitch = dir.y.asin();
        self.rotation = Vec3::new(pitch, yaw, 0.0);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub name: String,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub scale: [f32; 3],
    pub visible: bool,
    #[serde(default)]
    pub user_data: UserData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub background: [f32; 3],
    pub ambient_intensity: f32,
    pub sun_intensity: f32,
    pub fog_density: f32,
    #[serde(default)]
    pub user_data: UserData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_keeps_load_order_and_ids() {
        let mut registry = EntityRegistry::new();
        let a = registry.insert(LoadedModel::new("robot"));
        let b = registry.insert(LoadedModel::new("fox"));
        assert_eq!(registry.names(), vec!["robot", "fox"]);
        assert_eq!(a.borrow().id, EntityId(1));
        assert_eq!(b.borrow().id, EntityId(2));
        registry.remove(EntityId(1)).expect("remove robot");
        let c = registry.insert(LoadedModel::new("robot"));
        assert_eq!(c.borrow().id, EntityId(3), "ids are never reused");
        assert_eq!(registry.names(), vec!["fox", "robot"]);
    }

    #[test]
    fn find_by_name_sees_renames() {
        let mut registry = EntityRegistry::new();
        let entity = registry.insert(LoadedModel::new("crate"));
        entity.borrow_mut().name = "box".to_string();
        assert!(registry.find_by_name("crate").is_none());
        assert!(registry.find_by_name("box").is_some());
    }

    #[test]
    fn removed_entities_drop_with_their_user_data() {
        let mut registry = EntityRegistry::new();
        let entity = registry.insert(LoadedModel::new("lamp"));
        let weak = downgrade(&entity);
        drop(entity);
        assert!(weak.upgrade().is_some());
        registry.remove(EntityId(1));
        assert!(weak.upgrade().is_none(), "registry held the only strong reference");
    }

    #[test]
    fn camera_look_at_faces_target() {
        let mut camera = Camera { position: Vec3::new(0.0, 0.0, 5.0), ..Camera::default() };
        camera.look_at(Vec3::ZERO);
        assert!(camera.rotation.x.abs() < 1e-6);
        assert!(camera.rotation.y.abs() < 1e-6, "looking down -Z needs no yaw");
    }
}
