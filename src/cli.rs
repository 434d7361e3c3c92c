use crate::config::RuntimeConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliOverrides {
    pub fixture: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub frames: Option<usize>,
    pub watch: Option<bool>,
    dt: Option<f32>,
    max_operations: Option<u64>,
    seed: Option<u64>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Use --fixture/--config/--frames/--dt/--max-ops/--seed/--watch with values.");
            }
            let key = &flag[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "fixture" => overrides.fixture = Some(PathBuf::from(value)),
                "config" => overrides.config = Some(PathBuf::from(value)),
                "frames" => {
                    overrides.frames =
                        Some(value.parse::<usize>().with_context(|| format!("Invalid frame count '{value}'"))?);
                }
                "dt" => {
                    let dt = value.parse::<f32>().with_context(|| format!("Invalid dt '{value}'"))?;
                    if !dt.is_finite() || dt < 0.0 {
                        bail!("Invalid dt '{value}'. Use a non-negative number of seconds.");
                    }
                    overrides.dt = Some(dt);
                }
                "max-ops" => {
                    overrides.max_operations =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid max-ops '{value}'"))?);
                }
                "seed" => {
                    overrides.seed = Some(value.parse::<u64>().with_context(|| format!("Invalid seed '{value}'"))?);
                }
                "watch" => overrides.watch = Some(parse_bool_flag("watch", &value)?),
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --fixture, --config, --frames, --dt, --max-ops, --seed, --watch."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn config_overrides(&self) -> RuntimeConfigOverrides {
        RuntimeConfigOverrides { max_operations: self.max_operations, default_dt: self.dt, seed: self.seed }
    }

    #[cfg(test)]
    pub fn as_tuple(&self) -> (Option<usize>, Option<f32>, Option<u64>, Option<bool>) {
        (self.frames, self.dt, self.max_operations, self.watch)
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}
