//! synchook - post-sync Yocto build directory setup
//!
//! Entry point: parses the command line, loads the hook configuration and
//! dispatches to the requested stage(s). The process exit status mirrors the
//! first failing toolchain command.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use synchook::cli::{Cli, Commands};
use synchook::output::{failure, progress};
use synchook::preflight::{print_report, verify_environment};
use synchook::process_guard;
use synchook::{Hook, HookConfig, HookError, PrefetchTarget, RunContext, SystemRunner};

/// Initialize tracing; `RUST_LOG` overrides the default filter
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    // The running command is killed with us on SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::install_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let code = match run(cli) {
        Ok(()) => 0,
        Err(err) => {
            failure(format!("{:#}", err));
            err.downcast_ref::<HookError>()
                .map(HookError::exit_code)
                .unwrap_or(1)
        }
    };

    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading hook configuration from {:?}", path);
            HookConfig::load_from_file(path)?
        }
        None => HookConfig::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid hook configuration")?;

    let ctx = match &cli.top_dir {
        Some(top_dir) => {
            let top_dir = std::path::absolute(top_dir)
                .with_context(|| format!("Failed to resolve top directory {:?}", top_dir))?;
            RunContext::new(top_dir, &config.build_dir, &config.init_script)
        }
        None => RunContext::from_current_dir(&config.build_dir, &config.init_script)
            .context("Failed to determine the current directory")?,
    };
    debug!(?ctx, env_mode = %config.env_mode, "run context");

    let dry_run = cli.dry_run;
    let command = cli.command.unwrap_or(Commands::Run {
        hook_args: Vec::new(),
    });

    match command {
        Commands::Run { hook_args } => {
            verify_environment(&config, &ctx).warn_all();
            let mut hook = Hook::new(config, ctx, SystemRunner::new()).with_dry_run(dry_run);
            let report = hook.run(&hook_args)?;
            debug!(?report, "run report");
        }
        Commands::PatchConfig => {
            let mut hook = Hook::new(config, ctx, SystemRunner::new()).with_dry_run(dry_run);
            hook.patch_config()?;
        }
        Commands::AddLayers => {
            let mut hook = Hook::new(config, ctx, SystemRunner::new()).with_dry_run(dry_run);
            let layers = hook.register_layers()?;
            progress(format!("Registered {} layer(s).", layers.len()));
        }
        Commands::Prefetch { target, task } => {
            let mut prefetch = match (target, config.prefetch.clone()) {
                (Some(target), configured) => PrefetchTarget {
                    target,
                    ..configured.unwrap_or_default()
                },
                (None, Some(configured)) => configured,
                (None, None) => anyhow::bail!("No prefetch target configured (use --target)"),
            };
            if let Some(task) = task {
                prefetch.task = task;
            }
            let mut hook = Hook::new(config, ctx, SystemRunner::new()).with_dry_run(dry_run);
            hook.prefetch(&prefetch)?;
        }
        Commands::Check => {
            let report = verify_environment(&config, &ctx);
            print_report(&report);
            if !report.is_ok() {
                anyhow::bail!("Pre-flight check found {} issue(s)", report.issues().len());
            }
        }
        Commands::ShowConfig => {
            let json = serde_json::to_string_pretty(&config)
                .context("Failed to serialize hook configuration")?;
            println!("{}", json);
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            HookConfig::default().save_to_file(&path)?;
            progress(format!("Wrote default configuration to {}", path.display()));
        }
    }

    Ok(())
}
