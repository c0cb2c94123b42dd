//! Hook configuration: what the hook writes and registers.
//!
//! Everything the stock hook hardcodes lives here as data so it can be
//! replaced from a JSON file or in tests. A file may specify only some
//! fields; the rest fall back to the stock defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::settings::SettingsBlock;
use crate::toolchain::EnvMode;

/// Build target and task for the optional prefetch stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchTarget {
    pub target: String,
    #[serde(default = "default_task")]
    pub task: String,
}

fn default_task() -> String {
    "fetch".to_string()
}

impl Default for PrefetchTarget {
    fn default() -> Self {
        Self {
            target: "core-image-coda-cluster".to_string(),
            task: default_task(),
        }
    }
}

/// Hook configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Build directory, relative to the top directory
    pub build_dir: PathBuf,
    /// Environment-setup script, relative to the top directory
    pub init_script: PathBuf,
    pub settings: SettingsBlock,
    /// Layers to register, relative to the top directory, in order
    pub layers: Vec<PathBuf>,
    /// `None` disables the prefetch stage
    pub prefetch: Option<PrefetchTarget>,
    pub env_mode: EnvMode,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("build-rpi"),
            init_script: PathBuf::from("sources/poky/oe-init-build-env"),
            settings: SettingsBlock::default(),
            layers: [
                "sources/meta-openembedded/meta-oe",
                "sources/meta-openembedded/meta-python",
                "sources/meta-openembedded/meta-networking",
                "sources/meta-openembedded/meta-multimedia",
                "sources/meta-raspberrypi",
                "sources/meta-qt6",
                "sources/meta-coda",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            prefetch: Some(PrefetchTarget::default()),
            env_mode: EnvMode::default(),
        }
    }
}

impl HookConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize hook configuration to JSON")?;

        fs::write(&path, json + "\n")
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.build_dir.as_os_str().is_empty() {
            anyhow::bail!("Build directory must be specified");
        }
        if self.init_script.as_os_str().is_empty() {
            anyhow::bail!("Environment setup script must be specified");
        }

        self.settings.validate()?;

        for (index, layer) in self.layers.iter().enumerate() {
            if layer.as_os_str().is_empty() {
                anyhow::bail!("Layer #{} has an empty path", index + 1);
            }
        }

        if let Some(prefetch) = &self.prefetch {
            let target = prefetch.target.trim();
            if target.is_empty() {
                anyhow::bail!("Prefetch target must not be empty");
            }
            if target.chars().any(char::is_whitespace) {
                anyhow::bail!("Prefetch target must be a single recipe or image name");
            }
            if prefetch.task.trim().is_empty() {
                anyhow::bail!("Prefetch task must not be empty");
            }
        }

        Ok(())
    }
}
