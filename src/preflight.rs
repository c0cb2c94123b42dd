//! Pre-flight checks for the checkout the hook runs in
//!
//! Verifies before anything is executed:
//! - `bash` is on PATH (the setup script can only be sourced by a shell)
//! - the environment-setup script exists
//! - every configured layer directory exists
//! - the hook is not running as root (BitBake refuses to)
//!
//! `synchook check` turns findings into a failing exit status; a normal run
//! only logs them as warnings.

use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config::HookConfig;
use crate::context::RunContext;
use crate::output::TAG;
use crate::toolchain::SHELL;

/// Result of environment verification
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PreflightReport {
    pub missing_binaries: Vec<String>,
    pub missing_init_script: Option<PathBuf>,
    pub missing_layers: Vec<PathBuf>,
    pub is_root: bool,
}

impl PreflightReport {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.issues().is_empty()
    }

    /// One human-readable line per finding
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for binary in &self.missing_binaries {
            issues.push(format!("required binary not found on PATH: {}", binary));
        }
        if let Some(script) = &self.missing_init_script {
            issues.push(format!(
                "environment setup script not found: {}",
                script.display()
            ));
        }
        for layer in &self.missing_layers {
            issues.push(format!("layer directory not found: {}", layer.display()));
        }
        if self.is_root {
            issues.push("running as root; bitbake refuses to run as root".to_string());
        }
        issues
    }

    /// Log every finding as a warning
    pub fn warn_all(&self) {
        for issue in self.issues() {
            warn!("preflight: {}", issue);
        }
    }
}

/// Check if `name` resolves to a file in any PATH entry
fn binary_exists(name: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join(name).is_file())
}

fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Check the checkout against `config` without running anything.
pub fn verify_environment(config: &HookConfig, ctx: &RunContext) -> PreflightReport {
    let mut report = PreflightReport {
        is_root: is_running_as_root(),
        ..PreflightReport::default()
    };

    if !binary_exists(SHELL) {
        report.missing_binaries.push(SHELL.to_string());
    }

    if !ctx.init_script().is_file() {
        report.missing_init_script = Some(ctx.init_script().to_path_buf());
    }

    report.missing_layers = missing_layers(&config.layers, ctx);
    debug!(?report, "preflight finished");
    report
}

fn missing_layers(layers: &[PathBuf], ctx: &RunContext) -> Vec<PathBuf> {
    layers
        .iter()
        .map(|layer| ctx.resolve_layer(layer))
        .filter(|path| !path.is_dir())
        .collect()
}

/// Print a pass line, or every finding on stderr
pub fn print_report(report: &PreflightReport) {
    if report.is_ok() {
        println!("{} Pre-flight check passed.", TAG);
        return;
    }

    eprintln!("{} Pre-flight check failed:", TAG);
    for issue in report.issues() {
        eprintln!("   • {}", issue);
    }
}
