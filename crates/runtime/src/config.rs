//! Session preferences
//!
//! A TOML preferences file configures the workspace library search paths
//! and the parallel-execution contract (worker count and per-primitive
//! thresholds). Environment variables override the file: `APL_LIB_ROOT`
//! supplies search paths, `APL_INIT` an initialisation script.

use crate::parallel::ParallelConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const LIB_ROOT_ENV: &str = "APL_LIB_ROOT";
pub const INIT_SCRIPT_ENV: &str = "APL_INIT";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Preferences {
    /// Workspace library search paths, in search order
    #[serde(default)]
    pub lib_paths: Vec<PathBuf>,

    /// Script evaluated line by line at startup
    #[serde(default)]
    pub init_script: Option<PathBuf>,

    #[serde(default)]
    pub parallel: ParallelPrefs,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParallelPrefs {
    /// Worker count; 1 (the default) disables fan-out
    #[serde(default)]
    pub cores: Option<usize>,

    /// Default element-count threshold
    #[serde(default)]
    pub threshold: Option<usize>,

    /// Per-primitive monadic thresholds, keyed by glyph
    #[serde(default)]
    pub monadic: HashMap<String, usize>,

    /// Per-primitive dyadic thresholds, keyed by glyph
    #[serde(default)]
    pub dyadic: HashMap<String, usize>,
}

impl Preferences {
    pub fn from_str(text: &str) -> Result<Preferences, String> {
        toml::from_str(text).map_err(|e| format!("preferences: {}", e))
    }

    pub fn from_file(path: &Path) -> Result<Preferences, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("preferences {}: {}", path.display(), e))?;
        Preferences::from_str(&text)
    }

    /// The preferences file next to the user's config, if present
    pub fn discover() -> Preferences {
        let candidates = [
            std::env::var("APL_PREFERENCES").ok().map(PathBuf::from),
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config/apl/preferences.toml")),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                match Preferences::from_file(&path) {
                    Ok(p) => {
                        tracing::debug!(path = %path.display(), "preferences loaded");
                        return p;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "preferences ignored");
                        return Preferences::default();
                    }
                }
            }
        }
        Preferences::default()
    }

    /// Apply the parallel section onto a config
    pub fn parallel_config(&self) -> ParallelConfig {
        let mut cfg = ParallelConfig::default();
        if let Some(cores) = self.parallel.cores {
            cfg.cores = cores.max(1);
        }
        if let Some(t) = self.parallel.threshold {
            cfg.default_threshold = t;
        }
        for (glyph, &t) in &self.parallel.monadic {
            if let Some(c) = glyph.chars().next() {
                cfg.set_threshold_monadic(c, t);
            }
        }
        for (glyph, &t) in &self.parallel.dyadic {
            if let Some(c) = glyph.chars().next() {
                cfg.set_threshold_dyadic(c, t);
            }
        }
        cfg
    }

    /// Library paths with the environment override applied
    pub fn effective_lib_paths(&self) -> Vec<PathBuf> {
        if let Ok(paths) = std::env::var(LIB_ROOT_ENV) {
            return std::env::split_paths(&paths).collect();
        }
        self.lib_paths.clone()
    }
}
