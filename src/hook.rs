//! The post-sync hook itself.
//!
//! Drives the four stages strictly in order, stopping at the first failure:
//! environment init, local.conf patch, layer registration, optional prefetch.
//! Each stage is also callable on its own for the single-stage subcommands;
//! toolchain stages establish the environment first if needed.

use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::{HookConfig, PrefetchTarget};
use crate::context::RunContext;
use crate::error::Result;
use crate::output::{banner, progress};
use crate::runner::{CommandOutcome, CommandRunner};
use crate::settings::{PatchOutcome, apply_settings};
use crate::stage::{HookStage, StageTracker};
use crate::toolchain::{ToolCommand, Toolchain, ToolchainEnv};

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub patch: PatchOutcome,
    /// Absolute layer paths, in registration order
    pub layers: Vec<PathBuf>,
    pub prefetched: bool,
    pub dry_run: bool,
    /// Stages entered, in order
    pub stages: Vec<HookStage>,
    /// Optional stages that were skipped
    pub skipped: Vec<HookStage>,
}

/// One hook run over a fixed configuration and run context.
pub struct Hook<R: CommandRunner> {
    config: HookConfig,
    toolchain: Toolchain,
    runner: R,
    tracker: StageTracker,
    dry_run: bool,
}

impl<R: CommandRunner> Hook<R> {
    pub fn new(config: HookConfig, ctx: RunContext, runner: R) -> Self {
        let toolchain = Toolchain::new(ctx, config.env_mode);
        Self {
            config,
            toolchain,
            runner,
            tracker: StageTracker::new(),
            dry_run: false,
        }
    }

    /// Log commands and planned writes instead of performing them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        self.toolchain.context()
    }

    pub fn tracker(&self) -> &StageTracker {
        &self.tracker
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Run every stage in order.
    ///
    /// `hook_args` is caller metadata (e.g. from `repo`); it is logged and
    /// otherwise ignored.
    pub fn run(&mut self, hook_args: &[String]) -> Result<RunReport> {
        progress(format!("Hook called with arguments: {:?}", hook_args));
        banner("Starting post-sync Yocto environment configuration");

        let result = self.run_stages();
        if result.is_err() {
            if let Err(e) = self.tracker.fail() {
                warn!(error = %e, "could not record failed stage");
            }
            info!(failed_at = ?self.tracker.failed_at(), "hook run aborted");
        }
        result
    }

    fn run_stages(&mut self) -> Result<RunReport> {
        self.tracker.transition_to(HookStage::InitEnvironment)?;
        self.initialize_environment()?;

        self.tracker.transition_to(HookStage::PatchConfig)?;
        let patch = self.patch_config()?;

        self.tracker.transition_to(HookStage::RegisterLayers)?;
        let layers = self.register_layers()?;

        let prefetched = match self.config.prefetch.clone() {
            Some(target) => {
                self.tracker.transition_to(HookStage::Prefetch)?;
                self.prefetch(&target)?;
                self.tracker.advance()?;
                true
            }
            None => {
                self.tracker.skip_next()?;
                progress("Prefetch disabled, skipping source fetch.");
                false
            }
        };

        let ctx = self.toolchain.context();
        banner("Yocto environment setup is complete!");
        println!("Your build directory is '{}'.", self.config.build_dir.display());
        println!(
            "To use it, run: source {} {}",
            self.config.init_script.display(),
            self.config.build_dir.display()
        );
        debug!(build_dir = %ctx.build_dir().display(), "hook run completed");

        Ok(RunReport {
            patch,
            layers,
            prefetched,
            dry_run: self.dry_run,
            stages: self.tracker.history().to_vec(),
            skipped: self.tracker.skipped().to_vec(),
        })
    }

    /// Source the setup script against the build directory.
    ///
    /// In capture mode the resulting environment is kept for later stages.
    pub fn initialize_environment(&mut self) -> Result<()> {
        let invocation = self.toolchain.init_invocation();
        progress(format!(
            "Initializing build directory at: {}",
            self.context().build_dir().display()
        ));
        progress(format!("Running command: {}", invocation));

        if self.dry_run {
            info!(command = %invocation, "[DRY RUN] skipped environment setup");
            self.toolchain.set_captured(ToolchainEnv::default());
            return Ok(());
        }

        let outcome = self
            .runner
            .run(&invocation)?
            .ensure_success(&invocation.display)?;

        if invocation.capture_stdout {
            let env = ToolchainEnv::parse(&outcome.stdout)?;
            debug!(vars = env.len(), builddir = ?env.build_dir(), "captured toolchain environment");
            self.toolchain.set_captured(env);
        }

        progress(format!(
            "Build directory is at: {}",
            self.context().build_dir().display()
        ));
        Ok(())
    }

    /// Append the settings block to local.conf unless already present.
    pub fn patch_config(&mut self) -> Result<PatchOutcome> {
        let path = self.context().local_conf();
        progress(format!("Configuring {}...", path.display()));

        // The setup script that would create local.conf was not run
        if self.dry_run && !path.exists() {
            info!(path = %path.display(), "[DRY RUN] local.conf not created yet");
            progress("[DRY RUN] Custom settings would be appended to local.conf.");
            return Ok(PatchOutcome::WouldApply);
        }

        let outcome = apply_settings(&path, &self.config.settings, self.dry_run)?;
        match outcome {
            PatchOutcome::Applied => progress("Custom settings appended to local.conf."),
            PatchOutcome::AlreadyPresent => {
                progress("Custom settings already exist in local.conf. Skipping.")
            }
            PatchOutcome::WouldApply => {
                progress("[DRY RUN] Custom settings would be appended to local.conf.")
            }
        }
        Ok(outcome)
    }

    /// Register every configured layer, in order, stopping at the first failure.
    pub fn register_layers(&mut self) -> Result<Vec<PathBuf>> {
        self.ensure_environment()?;
        progress("Configuring conf/bblayers.conf...");

        let layers = self.config.layers.clone();
        let mut registered = Vec::with_capacity(layers.len());
        for layer in &layers {
            let path = self.context().resolve_layer(layer);
            self.execute(&ToolCommand::add_layer(&path))?;
            if self.tracker.current_stage() == HookStage::RegisterLayers {
                self.tracker.record_layer()?;
            }
            registered.push(path);
        }

        info!(count = registered.len(), "layers registered");
        Ok(registered)
    }

    /// Fetch-only build of `target`.
    pub fn prefetch(&mut self, target: &PrefetchTarget) -> Result<()> {
        self.ensure_environment()?;
        progress("Pre-fetching all source code for the image...");
        self.execute(&ToolCommand::run_only(&target.target, &target.task))?;
        Ok(())
    }

    /// Make toolchain commands resolvable, running the setup script if needed
    fn ensure_environment(&mut self) -> Result<()> {
        if self.toolchain.is_established() {
            return Ok(());
        }
        self.initialize_environment()
    }

    fn execute(&mut self, cmd: &ToolCommand) -> Result<CommandOutcome> {
        let invocation = self.toolchain.resolve(cmd)?;
        progress(format!("Running command: {}", invocation));

        if self.dry_run {
            info!(command = %invocation, "[DRY RUN] skipped");
            return Ok(CommandOutcome::exited(0));
        }

        self.runner
            .run(&invocation)?
            .ensure_success(&invocation.display)
    }
}
