pub mod animation;
pub mod authoring;
pub mod cli;
pub mod config;
pub mod console;
pub mod harness;
pub mod history;
pub mod input;
pub mod overlay;
pub mod samples;
pub mod scene;
pub mod scripts;
pub mod time;
pub mod value;
pub mod watch;

pub use config::RuntimeConfig;
pub use scripts::{FrameReport, Mode, ScriptError, ScriptRuntime, SlotId};

use std::fs;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cli::CliOverrides;
use crate::harness::{fixture_dir, load_fixture, HarnessSession};
use crate::watch::ScriptSourceWatcher;

const DEFAULT_CONFIG_PATH: &str = "config/sceneforge.json";

/// Runs a fixture headlessly and prints the JSON summary; with `--watch true` keeps stepping
/// frames and reloads script files as they change on disk.
pub fn run_with_overrides(cli: CliOverrides) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::load_or_default(DEFAULT_CONFIG_PATH),
    };
    let overrides = cli.config_overrides();
    if !overrides.is_empty() {
        log::info!("[config] CLI overrides applied: {}", overrides.applied_fields().join(", "));
    }
    config.apply_overrides(&overrides);

    let fixture_path = cli.fixture.clone().context("no fixture given; pass --fixture <path>")?;
    let mut fixture = load_fixture(&fixture_path)?;
    if let Some(frames) = cli.frames {
        fixture.frames = frames;
    }
    if overrides.default_dt.is_some() {
        fixture.dt = None;
    }

    let mut session = HarnessSession::new(fixture, &fixture_dir(&fixture_path), config)?;
    let output = session.run();
    println!("{}", serde_json::to_string_pretty(&output).context("serializing harness output")?);

    if cli.watch.unwrap_or(false) {
        watch_loop(&mut session)?;
    }
    Ok(())
}

fn watch_loop(session: &mut HarnessSession) -> Result<()> {
    let mut watcher = ScriptSourceWatcher::new()?;
    for (path, slot) in session.script_files() {
        watcher.watch_script(path, *slot)?;
    }
    log::info!("[watch] watching {} script file(s); Ctrl+C to stop", watcher.watched());
    let frame_time = Duration::from_secs_f32(session.dt().max(1.0 / 240.0));
    loop {
        for change in watcher.drain_changes() {
            match fs::read_to_string(&change.path) {
                Ok(text) => {
                    if session.runtime_mut().set_source(change.slot, text)? {
                        log::info!("[watch] reloaded {} into {}", change.path.display(), change.slot);
                    }
                }
                Err(err) => log::warn!("[watch] cannot read {}: {err}", change.path.display()),
            }
        }
        let result = session.step();
        for entry in &result.logs {
            println!("{}", serde_json::to_string(entry).context("serializing log entry")?);
        }
        thread::sleep(frame_time);
    }
}
