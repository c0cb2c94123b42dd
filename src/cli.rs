use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::HookConfig;
use crate::toolchain::EnvMode;

/// synchook - prepare a Yocto build directory after `repo sync`
#[derive(Parser)]
#[command(name = "synchook")]
#[command(about = "Post-sync hook: init build dir, patch local.conf, add layers, prefetch sources")]
#[command(version)]
pub struct Cli {
    /// JSON hook configuration (defaults are used for missing fields)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Top directory of the checkout (default: current directory)
    #[arg(long, global = true)]
    pub top_dir: Option<PathBuf>,

    /// Build directory, relative to the top directory
    #[arg(long, global = true)]
    pub build_dir: Option<PathBuf>,

    /// How the toolchain environment is re-established for each subtool
    #[arg(long, global = true, value_enum)]
    pub env_mode: Option<EnvMode>,

    /// Skip the source prefetch stage
    #[arg(long, global = true)]
    pub no_prefetch: bool,

    /// Dry-run mode: show what would be executed without running it.
    ///
    /// No toolchain command is started and local.conf is not written.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run every stage (the default when no command is given)
    Run {
        /// Hook metadata passed by the caller; logged and ignored
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        hook_args: Vec<String>,
    },
    /// Only append the custom settings to conf/local.conf
    PatchConfig,
    /// Only register the configured layers
    AddLayers,
    /// Only run the fetch-only build
    Prefetch {
        /// Image or recipe to fetch for (overrides the configuration)
        #[arg(long)]
        target: Option<String>,
        /// Task to run, passed as --runonly
        #[arg(long)]
        task: Option<String>,
    },
    /// Verify the checkout without running anything
    Check,
    /// Print the effective configuration as JSON
    ShowConfig,
    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut HookConfig) {
        if let Some(build_dir) = &self.build_dir {
            config.build_dir = build_dir.clone();
        }
        if let Some(mode) = self.env_mode {
            config.env_mode = mode;
        }
        if self.no_prefetch {
            config.prefetch = None;
        }
    }
}
