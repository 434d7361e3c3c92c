use sceneforge::animation::AnimationClip;
use sceneforge::console::LogLevel;
use sceneforge::input::InputEvent;
use sceneforge::scene::{EntityId, LoadedModel};
use sceneforge::value::UserValue;
use sceneforge::{Mode, RuntimeConfig, ScriptError, ScriptRuntime, SlotId};

const DT: f32 = 1.0 / 60.0;

const COUNTER: &str = r#"
fn update(entity, api, dt) {
    let data = entity.user_data;
    data.set("counter", data.get("counter", 0) + 1);
}
"#;

fn counter(runtime: &ScriptRuntime, id: EntityId) -> Option<i64> {
    let entity = runtime.entity(id).expect("entity exists");
    entity.user_data.get("counter").and_then(UserValue::as_int)
}

fn run_frames(runtime: &mut ScriptRuntime, frames: usize) {
    for _ in 0..frames {
        let report = runtime.frame(DT);
        assert!(report.errors.is_empty(), "frame {} reported errors: {:?}", report.frame, report.errors);
    }
}

#[test]
fn unit_is_built_once_and_runs_every_frame() {
    let mut runtime = ScriptRuntime::default();
    let id = runtime.load_model_with_script(LoadedModel::new("Cube"), COUNTER);

    let first = runtime.frame(DT);
    assert_eq!(first.compiled, vec![SlotId::Entity(id)]);
    run_frames(&mut runtime, 9);

    assert_eq!(counter(&runtime, id), Some(10));
    let stats = runtime.slot_stats(SlotId::Entity(id)).expect("slot stats");
    assert_eq!(stats.compile_count, 1, "unchanged source must not recompile");
    assert_eq!(stats.update_calls, 10);
}

#[test]
fn top_level_runs_once_and_closure_state_persists() {
    let mut runtime = ScriptRuntime::default();
    runtime.load_model(LoadedModel::new("Cube"));
    runtime.set_scene_source(
        r#"
        print("constructed");
        let ticks = 0;
        #{
            update: |scene, api, dt| {
                ticks += 1;
                scene.user_data.set("ticks", ticks);
            }
        }
        "#,
    );
    run_frames(&mut runtime, 5);

    let logs = runtime.take_logs();
    let constructed = logs.iter().filter(|entry| entry.message == "constructed").count();
    assert_eq!(constructed, 1, "top-level statements run only at construction");
    assert_eq!(runtime.scene().user_data.get("ticks"), Some(&UserValue::Int(5)));
}

#[test]
fn throwing_slot_does_not_stop_others() {
    let mut runtime = ScriptRuntime::default();
    runtime.set_scene_source(
        r#"
        fn update(scene, api, dt) {
            let data = scene.user_data;
            data.set("frames", data.get("frames", 0) + 1);
        }
        "#,
    );
    let broken = runtime.load_model_with_script(
        LoadedModel::new("Broken"),
        r#"fn update(entity, api, dt) { throw "kaput"; }"#,
    );
    let healthy = runtime.load_model_with_script(LoadedModel::new("Healthy"), COUNTER);

    runtime.frame(DT);
    let unit = runtime.slot_stats(SlotId::Entity(broken)).expect("stats").unit;
    for _ in 0..4 {
        let report = runtime.frame(DT);
        assert_eq!(report.errors_for(SlotId::Entity(broken)), 1);
        assert_eq!(report.errors_for(SlotId::Entity(healthy)), 0);
        assert!(matches!(report.errors[0], ScriptError::Runtime { .. }));
    }

    assert_eq!(counter(&runtime, healthy), Some(5), "later slots still run after an earlier one throws");
    assert_eq!(runtime.scene().user_data.get("frames"), Some(&UserValue::Int(5)), "the scene slot runs in failing frames");
    let stats = runtime.slot_stats(SlotId::Entity(broken)).expect("stats");
    assert_eq!(stats.unit, unit, "runtime errors never invalidate the unit");
    assert_eq!(stats.compile_count, 1);
    assert_eq!(stats.runtime_errors, 5);

    let errors: Vec<_> = runtime.take_logs().into_iter().filter(|entry| entry.level == LogLevel::Error).collect();
    assert_eq!(errors.len(), 5, "one logged error per failing frame");
    assert!(errors.iter().all(|entry| entry.message.contains("kaput")));
}

#[test]
fn source_change_rebuilds_and_keeps_user_data() {
    let mut runtime = ScriptRuntime::default();
    let id = runtime.load_model_with_script(LoadedModel::new("Cube"), COUNTER);
    run_frames(&mut runtime, 3);
    let before = runtime.slot_stats(SlotId::Entity(id)).expect("stats").unit;

    let changed = runtime
        .set_entity_source(
            id,
            r#"
            fn update(entity, api, dt) {
                let data = entity.user_data;
                data.set("counter", data.get("counter", 0) + 10);
            }
            "#,
        )
        .expect("slot exists");
    assert!(changed);
    run_frames(&mut runtime, 1);

    assert_eq!(counter(&runtime, id), Some(13), "user_data survives recompilation");
    let stats = runtime.slot_stats(SlotId::Entity(id)).expect("stats");
    assert_ne!(stats.unit, before, "a new unit replaces the old one");
    assert_eq!(stats.compile_count, 2);
}

#[test]
fn source_change_discards_closure_state() {
    let mut runtime = ScriptRuntime::default();
    let script = |step: i64| {
        format!(
            r#"
            let ticks = 0;
            #{{
                update: |e, api, dt| {{
                    ticks += {step};
                    let data = e.user_data;
                    data.set("ticks", ticks);
                    data.set("seen", data.get("seen", 0) + 1);
                }}
            }}
            "#
        )
    };
    let id = runtime.load_model_with_script(LoadedModel::new("Cube"), script(1));
    run_frames(&mut runtime, 3);
    assert_eq!(runtime.entity(id).expect("cube").user_data.get("ticks"), Some(&UserValue::Int(3)));

    assert!(runtime.set_entity_source(id, script(10)).expect("slot exists"));
    run_frames(&mut runtime, 2);

    let cube = runtime.entity(id).expect("cube");
    assert_eq!(cube.user_data.get("ticks"), Some(&UserValue::Int(20)), "captured counter restarts with the new unit");
    assert_eq!(cube.user_data.get("seen"), Some(&UserValue::Int(5)), "user_data carries over");
}

#[test]
fn panicking_construction_is_not_retried_every_frame() {
    let mut runtime = ScriptRuntime::default();
    runtime.engine_mut().register_fn("boom", || -> i64 { panic!("host function exploded") });
    let id = runtime.load_model_with_script(LoadedModel::new("Cube"), "boom();\nfn update(e, api, dt) {}");
    let healthy = runtime.load_model_with_script(LoadedModel::new("Healthy"), COUNTER);

    let first = runtime.frame(DT);
    let compile_errors: Vec<_> = first.compile_errors().collect();
    assert_eq!(compile_errors.len(), 1);
    assert!(compile_errors[0].to_string().contains("host function exploded"));
    for _ in 0..4 {
        let report = runtime.frame(DT);
        assert!(report.errors.is_empty(), "a panicked construction stays a silent no-op");
        assert!(report.compiled.is_empty());
    }

    let stats = runtime.slot_stats(SlotId::Entity(id)).expect("stats");
    assert_eq!(stats.compile_count, 1);
    assert!(stats.failed);
    assert_eq!(counter(&runtime, healthy), Some(5));

    runtime.set_entity_source(id, COUNTER).expect("fix script");
    run_frames(&mut runtime, 1);
    assert_eq!(counter(&runtime, id), Some(1));
}

#[test]
fn chars_in_user_data_stay_chars() {
    let mut runtime = ScriptRuntime::default();
    let id = runtime.load_model_with_script(
        LoadedModel::new("Cube"),
        r#"
        fn update(e, api, dt) {
            let data = e.user_data;
            if api.frame == 1 {
                data.set("grade", 'A');
            } else {
                data.set("kind", type_of(data.get("grade", ())));
            }
        }
        "#,
    );
    run_frames(&mut runtime, 2);
    let cube = runtime.entity(id).expect("cube");
    assert_eq!(cube.user_data.get("grade"), Some(&UserValue::Char('A')));
    assert_eq!(cube.user_data.get("kind"), Some(&UserValue::Str("char".into())));
}

#[test]
fn edits_between_frames_coalesce_into_one_compile() {
    let mut runtime = ScriptRuntime::default();
    let id = runtime.load_model_with_script(LoadedModel::new("Cube"), COUNTER);
    run_frames(&mut runtime, 1);

    runtime.set_entity_source(id, "fn update(e, a, dt) { 1 }").expect("edit one");
    runtime.set_entity_source(id, "fn update(e, a, dt) { 2 }").expect("edit two");
    assert!(!runtime.set_entity_source(id, "fn update(e, a, dt) { 2 }").expect("edit three"));
    run_frames(&mut runtime, 2);

    assert_eq!(runtime.slot_stats(SlotId::Entity(id)).expect("stats").compile_count, 2);
    assert_eq!(runtime.source(SlotId::Entity(id)), Some("fn update(e, a, dt) { 2 }"));
}

#[test]
fn construction_failure_is_logged_once_until_source_changes() {
    let mut runtime = ScriptRuntime::default();
    let id = runtime.load_model_with_script(LoadedModel::new("Cube"), "let speed = 3;");

    let first = runtime.frame(DT);
    assert_eq!(first.compile_errors().count(), 1);
    for _ in 0..3 {
        let report = runtime.frame(DT);
        assert!(report.errors.is_empty(), "a failed unit is a silent no-op until rebuilt");
        assert_eq!(report.calls, 0);
    }
    let stats = runtime.slot_stats(SlotId::Entity(id)).expect("stats");
    assert!(stats.failed);
    assert_eq!(stats.compile_count, 1);

    runtime.set_entity_source(id, COUNTER).expect("fix script");
    run_frames(&mut runtime, 2);
    assert_eq!(counter(&runtime, id), Some(2));
    assert!(!runtime.slot_stats(SlotId::Entity(id)).expect("stats").failed);
}

#[test]
fn blank_and_syntax_broken_slots() {
    let mut runtime = ScriptRuntime::default();
    let broken = runtime.load_model_with_script(LoadedModel::new("Broken"), "fn update(e, a, dt) { let = ; }");
    let report = runtime.frame(DT);
    assert_eq!(report.compiled, vec![SlotId::Entity(broken)], "the blank scene slot is skipped");
    assert!(matches!(&report.errors[..], [ScriptError::Compile { slot, .. }] if *slot == SlotId::Entity(broken)));
}

#[test]
fn editing_clears_overlay_and_resume_keeps_valid_units() {
    let mut runtime = ScriptRuntime::default();
    runtime.set_scene_source(
        r#"
        fn update(scene, api, dt) {
            if !api.has_ui("hud") {
                api.create_ui(`<div id="hud">HP <b>3</b></div>`);
            }
        }
        "#,
    );
    run_frames(&mut runtime, 2);
    assert!(runtime.overlay().contains_id("hud"));
    assert_eq!(runtime.overlay().len(), 1, "has_ui guards against duplicates");

    runtime.set_mode(Mode::Editing);
    assert!(runtime.overlay().is_empty(), "entering editing empties the overlay root");
    let idle = runtime.frame(DT);
    assert!(!idle.ran);
    assert_eq!(idle.calls, 0);

    runtime.set_mode(Mode::Running);
    run_frames(&mut runtime, 1);
    assert!(runtime.overlay().contains_id("hud"));
    let stats = runtime.slot_stats(SlotId::Scene).expect("scene stats");
    assert_eq!(stats.compile_count, 1, "resuming does not rebuild a valid, unchanged unit");
}

#[test]
fn resume_retries_failed_units_and_can_force_rebuilds() {
    let mut runtime = ScriptRuntime::default();
    let id = runtime.load_model_with_script(LoadedModel::new("Cube"), "let nothing = ();");
    runtime.frame(DT);
    runtime.set_mode(Mode::Editing);
    runtime.set_mode(Mode::Running);
    let report = runtime.frame(DT);
    assert_eq!(report.compile_errors().count(), 1, "the failed unit is re-validated on resume");
    assert_eq!(runtime.slot_stats(SlotId::Entity(id)).expect("stats").compile_count, 2);

    let mut config = RuntimeConfig::default();
    config.scripting.recompile_on_resume = true;
    let mut forced = ScriptRuntime::new(config);
    let cube = forced.load_model_with_script(LoadedModel::new("Cube"), COUNTER);
    run_frames(&mut forced, 1);
    forced.set_mode(Mode::Editing);
    forced.set_mode(Mode::Running);
    run_frames(&mut forced, 1);
    assert_eq!(forced.slot_stats(SlotId::Entity(cube)).expect("stats").compile_count, 2);
    assert_eq!(counter(&forced, cube), Some(2));
}

#[test]
fn later_slot_wins_the_shared_mixer() {
    let mut runtime = ScriptRuntime::default();
    let play = |clip: &str, entity: &str| {
        format!("fn update(e, api, dt) {{ if api.frame == 1 {{ api.play_animation(\"{entity}\", \"{clip}\"); }} }}")
    };
    runtime.load_model_with_script(
        LoadedModel::new("Robot").with_clip(AnimationClip::new("Walk", 1.0)),
        play("Walk", "Robot"),
    );
    let fox = runtime.load_model_with_script(
        LoadedModel::new("Fox").with_clip(AnimationClip::once("Jump", 0.5)),
        play("Jump", "Fox"),
    );
    run_frames(&mut runtime, 1);

    let active = runtime.active_animation().expect("a clip is playing");
    assert_eq!((active.entity, active.clip.as_str()), (fox, "Jump"));
    assert_eq!(runtime.mixer().borrow().play_count(), 2);

    run_frames(&mut runtime, 60);
    let active = runtime.active_animation().expect("clip kept after finishing");
    assert!(active.finished, "non-looping clip clamps at its end");
}

#[test]
fn unknown_clip_is_a_warning_not_an_error() {
    let mut runtime = ScriptRuntime::default();
    runtime.load_model_with_script(
        LoadedModel::new("Robot").with_clip(AnimationClip::new("Walk", 1.0)),
        r#"
        fn update(e, api, dt) {
            e.user_data.set("played", api.play_animation("Robot", "Dance"));
            e.user_data.set("clips", api.animations("Robot").len());
        }
        "#,
    );
    run_frames(&mut runtime, 1);
    assert!(runtime.active_animation().is_none(), "mixer untouched");
    let robot = runtime.entity_by_name("Robot").expect("robot");
    assert_eq!(robot.user_data.get("played"), Some(&UserValue::Bool(false)));
    assert_eq!(robot.user_data.get("clips"), Some(&UserValue::Int(1)));
    let warned = runtime.take_logs().iter().any(|entry| entry.level == LogLevel::Warn && entry.message.contains("Dance"));
    assert!(warned, "missing clip is reported to the operator");
}

#[test]
fn find_sees_renames_and_misses_return_unit() {
    let mut runtime = ScriptRuntime::default();
    runtime.set_scene_source(
        r#"
        fn update(scene, api, dt) {
            let cube = api.find("Cube");
            if type_of(cube) == "Entity" { cube.name = "Box"; }
        }
        "#,
    );
    let probe = runtime.load_model_with_script(
        LoadedModel::new("Probe"),
        r#"
        fn update(e, api, dt) {
            e.user_data.set("found_box", type_of(api.find("Box")) == "Entity");
            e.user_data.set("ghost", type_of(api.find("Ghost")));
            e.user_data.set("names", api.entities());
        }
        "#,
    );
    runtime.load_model(LoadedModel::new("Cube"));
    run_frames(&mut runtime, 1);

    let probe = runtime.entity(probe).expect("probe");
    assert_eq!(probe.user_data.get("found_box"), Some(&UserValue::Bool(true)));
    assert_eq!(probe.user_data.get("ghost"), Some(&UserValue::Str("()".into())));
    assert_eq!(
        probe.user_data.get("names"),
        Some(&UserValue::List(vec![UserValue::Str("Probe".into()), UserValue::Str("Box".into())]))
    );
}

#[test]
fn transforms_and_scene_state_are_writable() {
    let mut runtime = ScriptRuntime::default();
    runtime.set_scene_source(
        r#"
        fn update(scene, api, dt) {
            scene.background = vec3(0.5, 0.25, 1.0);
            scene.fog_density = 0.1;
            api.camera.fov = 45.0;
        }
        "#,
    );
    let id = runtime.load_model_with_script(
        LoadedModel::new("Cube"),
        r#"
        fn update(e, api, dt) {
            e.position = vec3(1, 2, 3) + vec3(0.5, 0.0, 0.0);
            e.position.y = 4.0;
            e.visible = false;
            e.set_scale(2.0);
        }
        "#,
    );
    run_frames(&mut runtime, 1);

    let cube = runtime.entity(id).expect("cube");
    assert_eq!(cube.position, [1.5, 4.0, 3.0]);
    assert_eq!(cube.scale, [2.0, 2.0, 2.0]);
    assert!(!cube.visible);
    let scene = runtime.scene();
    assert_eq!(scene.background, [0.5, 0.25, 1.0]);
    assert!((scene.fog_density - 0.1).abs() < 1e-6);
    assert_eq!(runtime.camera().fov, 45.0);
}

#[test]
fn input_snapshot_reaches_scripts() {
    let mut runtime = ScriptRuntime::default();
    let id = runtime.load_model_with_script(
        LoadedModel::new("Cube"),
        r#"
        fn update(e, api, dt) {
            let input = api.input;
            e.user_data.set("jump", input.is_key_down("space"));
            e.user_data.set("click", input.is_button_down(0));
            e.user_data.set("x", input.pointer_x);
        }
        "#,
    );
    runtime.push_input(InputEvent::KeyDown { key: "Space".into() });
    runtime.push_input(InputEvent::ButtonDown { button: 0 });
    runtime.push_input(InputEvent::PointerMove { x: 12.0, y: 3.0 });
    run_frames(&mut runtime, 1);

    let cube = runtime.entity(id).expect("cube");
    assert_eq!(cube.user_data.get("jump"), Some(&UserValue::Bool(true)));
    assert_eq!(cube.user_data.get("click"), Some(&UserValue::Bool(true)));
    assert_eq!(cube.user_data.get("x"), Some(&UserValue::Float(12.0)));

    runtime.push_input(InputEvent::Blur);
    run_frames(&mut runtime, 1);
    let cube = runtime.entity(id).expect("cube");
    assert_eq!(cube.user_data.get("jump"), Some(&UserValue::Bool(false)));
}

#[test]
fn unsupported_user_data_values_raise_runtime_errors() {
    let mut runtime = ScriptRuntime::default();
    let id = runtime.load_model_with_script(
        LoadedModel::new("Cube"),
        r#"fn update(e, api, dt) { e.user_data.set("api", api); }"#,
    );
    let report = runtime.frame(DT);
    let messages: Vec<String> = report.runtime_errors().map(ToString::to_string).collect();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("user_data cannot store"), "unexpected message: {}", messages[0]);
    assert!(runtime.entity(id).expect("cube").user_data.is_empty());
}

#[test]
fn timed_ui_removal_fires_on_the_clock() {
    let mut runtime = ScriptRuntime::default();
    runtime.set_scene_source(
        r#"
        fn update(scene, api, dt) {
            if api.frame == 1 {
                api.create_ui("<p id=\"toast\">saved</p>");
                api.remove_ui_after("toast", 0.05);
            }
        }
        "#,
    );
    run_frames(&mut runtime, 2);
    assert!(runtime.overlay().contains_id("toast"));
    let mut expired = Vec::new();
    for _ in 0..5 {
        expired.extend(runtime.frame(DT).expired_ui);
    }
    assert_eq!(expired, vec!["toast".to_string()]);
    assert!(!runtime.overlay().contains_id("toast"));
}

#[test]
fn retained_api_is_refused_in_later_frames() {
    let mut runtime = ScriptRuntime::default();
    runtime.load_model(LoadedModel::new("Cube"));
    runtime.set_scene_source(
        r#"
        let saved = ();
        #{
            update: |scene, api, dt| {
                if !api.has_ui("hud") {
                    api.create_ui("<p id=\"hud\">live</p>");
                }
                if type_of(saved) == "Api" {
                    saved.create_ui("<p id=\"stale\">late</p>");
                    let data = scene.user_data;
                    data.set("stale_has_ui", saved.has_ui("hud"));
                    data.set("stale_entities", saved.entities().len());
                    data.set("live_entities", api.entities().len());
                }
                saved = api;
            }
        }
        "#,
    );
    run_frames(&mut runtime, 2);
    assert!(!runtime.overlay().contains_id("stale"));
    assert!(runtime.overlay().contains_id("hud"));
    let scene = runtime.scene();
    let data = &scene.user_data;
    assert_eq!(data.get("stale_has_ui"), Some(&UserValue::Bool(false)), "stale queries answer nothing");
    assert_eq!(data.get("stale_entities"), Some(&UserValue::Int(0)));
    assert_eq!(data.get("live_entities"), Some(&UserValue::Int(1)));
    let warned = runtime.take_logs().iter().any(|entry| entry.level == LogLevel::Warn && entry.message.contains("frame 1"));
    assert!(warned, "stale capability use is reported");
}

#[test]
fn removed_entities_stop_running() {
    let mut runtime = ScriptRuntime::default();
    let id = runtime.load_model_with_script(LoadedModel::new("Cube"), COUNTER);
    run_frames(&mut runtime, 2);
    assert!(runtime.remove_entity(id));
    assert!(!runtime.remove_entity(id));
    let report = runtime.frame(DT);
    assert_eq!(report.calls, 0);
    assert!(runtime.entity(id).is_none());
    assert!(runtime.set_entity_source(id, COUNTER).is_err(), "the slot went away with its entity");
}

#[test]
fn operation_budget_stops_runaway_scripts() {
    let mut config = RuntimeConfig::default();
    config.scripting.max_operations = 10_000;
    let mut runtime = ScriptRuntime::new(config);
    let spinner = runtime.load_model_with_script(LoadedModel::new("Spinner"), "fn update(e, a, dt) { loop { } }");
    let healthy = runtime.load_model_with_script(LoadedModel::new("Healthy"), COUNTER);
    let report = runtime.frame(DT);
    assert_eq!(report.errors_for(SlotId::Entity(spinner)), 1);
    assert_eq!(counter(&runtime, healthy), Some(1));
}
