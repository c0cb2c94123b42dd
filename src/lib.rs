//! synchook library
//!
//! Post-sync automation for a Yocto build directory: environment init,
//! idempotent local.conf settings, layer registration and source prefetch.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod hook;
pub mod output;
pub mod preflight;
pub mod process_guard;
pub mod runner;
pub mod settings;
pub mod stage;
pub mod toolchain;

// Re-export main types for convenience
pub use config::{HookConfig, PrefetchTarget};
pub use context::RunContext;
pub use error::HookError;
pub use hook::{Hook, RunReport};
pub use preflight::{PreflightReport, verify_environment};
pub use process_guard::{ChildSlot, ChildTicket, CommandProcessGroup, terminate_group};
pub use runner::{CommandOutcome, CommandRunner, SystemRunner};
pub use settings::{PatchOutcome, SettingsBlock, apply_settings};
pub use stage::{HookStage, StageTracker, StageTransitionError};
pub use toolchain::{CommandEnv, EnvMode, Invocation, ToolCommand, Toolchain, ToolchainEnv};
