//! Bundled example scripts shown to operators as starting points.

use serde::Serialize;

use crate::history::ScriptKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScriptSample {
    pub name: &'static str,
    pub prompt: &'static str,
    pub kind: ScriptKind,
    pub source: &'static str,
}

const SPINNER: &str = r#"
let speed = 1.5;

#{
    update: |entity, api, dt| entity.rotate(0.0, speed * dt, 0.0)
}
"#;

const BOBBING: &str = r#"
fn update(entity, api, dt) {
    let data = entity.user_data;
    if !data.contains("base_y") {
        data.set("base_y", entity.position.y);
    }
    let pos = entity.position;
    pos.y = data.get("base_y", 0.0) + (api.time * 2.0).sin() * 0.25;
    entity.position = pos;
}
"#;

const COUNTER_HUD: &str = r#"
let frames = 0;

#{
    update: |scene, api, dt| {
        frames += 1;
        api.remove_ui("hud");
        api.create_ui(`<div id="hud" class="counter">frames: ${frames}</div>`);
    }
}
"#;

const KEYBOARD_MOVER: &str = r#"
fn update(entity, api, dt) {
    let speed = 2.0;
    let input = api.input;
    let x = 0.0;
    let z = 0.0;
    if input.is_key_down("a") { x -= 1.0; }
    if input.is_key_down("d") { x += 1.0; }
    if input.is_key_down("w") { z -= 1.0; }
    if input.is_key_down("s") { z += 1.0; }
    if x != 0.0 || z != 0.0 {
        entity.translate(x * speed * dt, 0.0, z * speed * dt);
    }
}
"#;

const CLICK_TO_ANIMATE: &str = r#"
fn update(entity, api, dt) {
    let input = api.input;
    let data = entity.user_data;
    let down = input.is_button_down(0);
    if down && !data.get("was_down", false) {
        let clips = api.animations(entity.name);
        if clips.len() > 0 {
            api.play_animation(entity.name, clips[0].name);
        } else {
            api.warn(`${entity.name} has no animations`);
        }
    }
    data.set("was_down", down);
}
"#;

const DAY_NIGHT: &str = r#"
fn update(scene, api, dt) {
    let t = (api.time * 0.1).sin() * 0.5 + 0.5;
    scene.background = vec3(0.05 + 0.45 * t, 0.07 + 0.55 * t, 0.15 + 0.7 * t);
    scene.sun_intensity = t;
    scene.ambient_intensity = 0.2 + 0.3 * t;
    scene.fog_density = 0.02 * (1.0 - t);
}
"#;

const SAMPLES: &[ScriptSample] = &[
    ScriptSample { name: "spinner", prompt: "make it spin slowly", kind: ScriptKind::Entity, source: SPINNER },
    ScriptSample { name: "bobbing", prompt: "float up and down", kind: ScriptKind::Entity, source: BOBBING },
    ScriptSample { name: "counter_hud", prompt: "show a frame counter", kind: ScriptKind::Scene, source: COUNTER_HUD },
    ScriptSample {
        name: "keyboard_mover",
        prompt: "move it with WASD",
        kind: ScriptKind::Entity,
        source: KEYBOARD_MOVER,
    },
    ScriptSample {
        name: "click_to_animate",
        prompt: "play its first animation when I click",
        kind: ScriptKind::Entity,
        source: CLICK_TO_ANIMATE,
    },
    ScriptSample { name: "day_night", prompt: "cycle between day and night", kind: ScriptKind::Scene, source: DAY_NIGHT },
];

pub fn samples() -> &'static [ScriptSample] {
    SAMPLES
}

pub fn find_sample(name: &str) -> Option<&'static ScriptSample> {
    SAMPLES.iter().find(|sample| sample.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::AnimationClip;
    use crate::input::InputEvent;
    use crate::scene::LoadedModel;
    use crate::scripts::{ScriptRuntime, SlotId};

    fn run_one_frame(sample: &ScriptSample) -> ScriptRuntime {
        let mut runtime = ScriptRuntime::default();
        let model = LoadedModel::new("Cube").with_clip(AnimationClip::new("Wave", 1.0));
        match sample.kind {
            ScriptKind::Scene => {
                runtime.load_model(model);
                runtime.set_scene_source(sample.source);
            }
            ScriptKind::Entity => {
                runtime.load_model_with_script(model, sample.source);
            }
        }
        runtime.push_input(InputEvent::KeyDown { key: "W".into() });
        runtime.push_input(InputEvent::ButtonDown { button: 0 });
        let report = runtime.frame(1.0 / 60.0);
        assert!(report.errors.is_empty(), "sample '{}' failed: {:?}", sample.name, report.errors);
        assert_eq!(report.compiled.len(), 1, "sample '{}' should compile exactly once", sample.name);
        assert_eq!(report.calls, 1, "sample '{}' should run one update", sample.name);
        runtime
    }

    #[test]
    fn every_sample_compiles_and_runs_a_frame() {
        for sample in samples() {
            run_one_frame(sample);
        }
    }

    #[test]
    fn samples_have_visible_effects() {
        let hud = run_one_frame(find_sample("counter_hud").expect("hud sample"));
        assert!(hud.overlay().render_markup().contains("frames: 1"));

        let clicker = run_one_frame(find_sample("click_to_animate").expect("click sample"));
        let active = clicker.active_animation().expect("click starts the first clip");
        assert_eq!(active.clip, "Wave");

        let mover = run_one_frame(find_sample("KEYBOARD_MOVER").expect("lookup ignores case"));
        let cube = mover.entity_by_name("Cube").expect("cube");
        assert!(cube.position[2] < 0.0, "holding W moves toward -z");
        assert!(mover.slot_stats(SlotId::Scene).expect("scene slot").compile_count == 0);
    }
}
