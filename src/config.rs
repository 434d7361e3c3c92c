use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptingConfig {
    /// Operation budget per script call; 0 leaves calls unbounded.
    #[serde(default)]
    pub max_operations: u64,
    #[serde(default = "ScriptingConfig::default_max_call_levels")]
    pub max_call_levels: usize,
    #[serde(default = "ScriptingConfig::default_max_expr_depth")]
    pub max_expr_depth: usize,
    #[serde(default)]
    pub max_string_size: usize,
    #[serde(default)]
    pub max_array_size: usize,
    #[serde(default)]
    pub max_map_size: usize,
    #[serde(default = "ScriptingConfig::default_ast_cache_limit")]
    pub ast_cache_limit: usize,
    #[serde(default)]
    pub recompile_on_resume: bool,
    #[serde(default = "ScriptingConfig::default_retry_failed_on_resume")]
    pub retry_failed_on_resume: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClockConfig {
    #[serde(default = "ClockConfig::default_max_delta")]
    pub max_delta: f32,
    #[serde(default = "ClockConfig::default_dt")]
    pub default_dt: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "OverlayConfig::default_max_elements")]
    pub max_elements: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "LogConfig::default_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HistoryConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub scripting: ScriptingConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigOverrides {
    pub max_operations: Option<u64>,
    pub default_dt: Option<f32>,
    pub seed: Option<u64>,
}

impl ScriptingConfig {
    const fn default_max_call_levels() -> usize {
        64
    }

    const fn default_max_expr_depth() -> usize {
        128
    }

    const fn default_ast_cache_limit() -> usize {
        256
    }

    const fn default_retry_failed_on_resume() -> bool {
        true
    }
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: Self::default_max_call_levels(),
            max_expr_depth: Self::default_max_expr_depth(),
            max_string_size: 0,
            max_array_size: 0,
            max_map_size: 0,
            ast_cache_limit: Self::default_ast_cache_limit(),
            recompile_on_resume: false,
            retry_failed_on_resume: Self::default_retry_failed_on_resume(),
            seed: None,
        }
    }
}

impl ClockConfig {
    const fn default_max_delta() -> f32 {
        0.25
    }

    const fn default_dt() -> f32 {
        1.0 / 60.0
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { max_delta: Self::default_max_delta(), default_dt: Self::default_dt() }
    }
}

impl OverlayConfig {
    const fn default_max_elements() -> usize {
        512
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { max_elements: Self::default_max_elements() }
    }
}

impl LogConfig {
    const fn default_capacity() -> usize {
        512
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { capacity: Self::default_capacity() }
    }
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RuntimeConfigOverrides) {
        if let Some(max_operations) = overrides.max_operations {
            self.scripting.max_operations = max_operations;
        }
        if let Some(dt) = overrides.default_dt {
            self.clock.default_dt = dt;
        }
        if let Some(seed) = overrides.seed {
            self.scripting.seed = Some(seed);
        }
    }
}

impl RuntimeConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.max_operations.is_none() && self.default_dt.is_none() && self.seed.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.max_operations.is_some() {
            fields.push("max_operations");
        }
        if self.default_dt.is_some() {
            fields.push("dt");
        }
        if self.seed.is_some() {
            fields.push("seed");
        }
        fields
    }
}
