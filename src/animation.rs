//! The single scene-wide animation mixer.
//!
//! At most one clip plays at a time across the whole scene: `play` always stops whatever
//! was playing before, regardless of which entity or script started it. Two scripts that
//! request different clips within one frame therefore leave the clip of the later-dispatched
//! slot playing.

use serde::{Deserialize, Serialize};

use crate::scene::EntityId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    #[serde(default = "AnimationClip::default_looped")]
    pub looped: bool,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, duration: f32) -> Self {
        Self { name: name.into(), duration: duration.max(0.0), looped: true }
    }

    pub fn once(name: impl Into<String>, duration: f32) -> Self {
        Self { looped: false, ..Self::new(name, duration) }
    }

    const fn default_looped() -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveClip {
    pub entity: EntityId,
    pub entity_name: String,
    pub clip: String,
    pub duration: f32,
    pub looped: bool,
    pub time: f32,
    pub finished: bool,
}

#[derive(Debug, Default)]
pub struct AnimationMixer {
    active: Option<ActiveClip>,
    plays: u64,
}

impl AnimationMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the current clip (if any), then starts `clip` from time zero.
    pub fn play(&mut self, entity: EntityId, entity_name: &str, clip: &AnimationClip) {
        if let Some(previous) = self.active.take() {
            log::debug!(
                target: "sceneforge::animation",
                "stopping '{}' on '{}' to play '{}' on '{}'",
                previous.clip,
                previous.entity_name,
                clip.name,
                entity_name
            );
        }
        self.active = Some(ActiveClip {
            entity,
            entity_name: entity_name.to_string(),
            clip: clip.name.clone(),
            duration: clip.duration,
            looped: clip.looped,
            time: 0.0,
            finished: false,
        });
        self.plays += 1;
    }

    pub fn stop(&mut self) -> Option<ActiveClip> {
        self.active.take()
    }

    /// Stops the active clip only when it belongs to `entity`.
    pub fn stop_entity(&mut self, entity: EntityId) -> bool {
        if self.active.as_ref().is_some_and(|active| active.entity == entity) {
            self.active = None;
            true
        } else {
            false
        }
    }

    pub fn advance(&mut self, dt: f32) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.finished || dt <= 0.0 {
            return;
        }
        active.time += dt;
        if active.duration <= 0.0 {
            active.time = 0.0;
            active.finished = !active.looped;
            return;
        }
        if active.time >= active.duration {
            if active.looped {
                active.time %= active.duration;
            } else {
                active.time = active.duration;
                active.finished = true;
            }
        }
    }

    pub fn active(&self) -> Option<&ActiveClip> {
        self.active.as_ref()
    }

    pub fn is_playing(&self, entity: EntityId, clip: &str) -> bool {
        self.active.as_ref().is_some_and(|active| active.entity == entity && active.clip == clip)
    }

    /// Number of `play` calls since creation.
    pub fn play_count(&self) -> u64 {
        self.plays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_replaces_previous_clip() {
        let mut mixer = AnimationMixer::new();
        mixer.play(EntityId(1), "robot", &AnimationClip::new("Walk", 1.0));
        mixer.advance(0.4);
        mixer.play(EntityId(2), "fox", &AnimationClip::new("Run", 0.8));
        let active = mixer.active().expect("clip should be active");
        assert_eq!(active.clip, "Run");
        assert_eq!(active.entity, EntityId(2));
        assert_eq!(active.time, 0.0, "newly played clip starts from zero");
        assert!(!mixer.is_playing(EntityId(1), "Walk"));
        assert_eq!(mixer.play_count(), 2);
    }

    #[test]
    fn looping_clip_wraps_time() {
        let mut mixer = AnimationMixer::new();
        mixer.play(EntityId(1), "robot", &AnimationClip::new("Idle", 1.0));
        mixer.advance(2.5);
        let active = mixer.active().expect("clip active");
        assert!((active.time - 0.5).abs() < 1e-5, "time should wrap, got {}", active.time);
        assert!(!active.finished);
    }

    #[test]
    fn one_shot_clip_clamps_and_finishes() {
        let mut mixer = AnimationMixer::new();
        mixer.play(EntityId(1), "door", &AnimationClip::once("Open", 0.5));
        mixer.advance(0.75);
        let active = mixer.active().expect("finished clip stays visible");
        assert!(active.finished);
        assert_eq!(active.time, 0.5);
    }

    #[test]
    fn stop_entity_only_affects_owner() {
        let mut mixer = AnimationMixer::new();
        mixer.play(EntityId(3), "bird", &AnimationClip::new("Fly", 1.0));
        assert!(!mixer.stop_entity(EntityId(4)));
        assert!(mixer.active().is_some());
        assert!(mixer.stop_entity(EntityId(3)));
        assert!(mixer.active().is_none());
    }
}
