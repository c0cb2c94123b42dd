//! Toolchain command contracts.
//!
//! `oe-init-build-env` only takes effect when sourced by a shell, so every
//! toolchain subtool needs its environment re-established in a fresh process.
//! Two strategies are supported (see [`EnvMode`]):
//!
//! - **capture**: source the script once, dump the resulting environment with
//!   `env -0`, and hand that environment explicitly to every later command.
//! - **source**: wrap each toolchain command in a `bash -c` that sources the
//!   script first, the way a shell user would.
//!
//! Whether a command needs the toolchain environment is an explicit
//! [`CommandEnv`] tag on the command, never inferred from its text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};

use crate::context::RunContext;
use crate::error::{HookError, Result};

/// Shell used to source the environment-setup script
pub const SHELL: &str = "bash";

/// Sources the setup script (stdout redirected so only `env -0` reaches the pipe)
const CAPTURE_SCRIPT: &str = r#"source "$1" "$2" >&2 && env -0"#;

/// Sources the setup script once, for its side effect on the build directory
const INIT_SCRIPT: &str = r#"source "$1" "$2""#;

/// Sources the setup script, then replaces the shell with the wrapped command
const WRAP_SCRIPT: &str = r#"source "$1" "$2" && shift 2 && exec "$@""#;

/// How the toolchain environment is re-established for each subtool.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EnvMode {
    /// Capture the environment once and pass it to every subtool
    #[default]
    Capture,
    /// Re-source the setup script in a shell for every subtool
    Source,
}

/// Which environment a command must run in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEnv {
    /// The hook's own inherited environment
    Host,
    /// The environment produced by the setup script
    Toolchain,
}

/// A toolchain-level command before environment resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: CommandEnv,
}

impl ToolCommand {
    /// `bitbake-layers add-layer <path>`
    pub fn add_layer(layer: &Path) -> Self {
        Self {
            program: "bitbake-layers".to_string(),
            args: vec!["add-layer".to_string(), layer.display().to_string()],
            env: CommandEnv::Toolchain,
        }
    }

    /// `bitbake <target> --runonly=<task>`
    pub fn run_only(target: &str, task: &str) -> Self {
        Self {
            program: "bitbake".to_string(),
            args: vec![target.to_string(), format!("--runonly={}", task)],
            env: CommandEnv::Toolchain,
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A fully resolved process invocation, ready for a [`crate::runner::CommandRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// `None` inherits the hook's environment; `Some` replaces it entirely
    pub env: Option<BTreeMap<OsString, OsString>>,
    /// Pipe stdout back to the caller instead of passing it through
    pub capture_stdout: bool,
    /// Human-readable form used in progress lines and errors
    pub display: String,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Environment variables produced by sourcing the setup script.
///
/// Names and values are kept as raw bytes so children see exactly what the
/// script exported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainEnv {
    vars: BTreeMap<OsString, OsString>,
}

impl ToolchainEnv {
    /// Parse the NUL-separated `KEY=VALUE` records written by `env -0`.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut vars = BTreeMap::new();
        for record in raw.split(|b| *b == 0) {
            if record.is_empty() {
                continue;
            }
            let Some(eq) = record.iter().position(|b| *b == b'=') else {
                return Err(HookError::env_capture(format!(
                    "malformed environment record: {:?}",
                    String::from_utf8_lossy(record)
                )));
            };
            if eq == 0 {
                return Err(HookError::env_capture(format!(
                    "environment record without a name: {:?}",
                    String::from_utf8_lossy(record)
                )));
            }
            vars.insert(
                OsStr::from_bytes(&record[..eq]).to_os_string(),
                OsStr::from_bytes(&record[eq + 1..]).to_os_string(),
            );
        }

        if vars.is_empty() {
            return Err(HookError::env_capture(
                "setup script produced no environment",
            ));
        }
        Ok(Self { vars })
    }

    /// Look up a captured variable
    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `BUILDDIR` as exported by the setup script, if any
    pub fn build_dir(&self) -> Option<PathBuf> {
        self.get("BUILDDIR").map(PathBuf::from)
    }

    pub fn vars(&self) -> &BTreeMap<OsString, OsString> {
        &self.vars
    }
}

/// Resolves [`ToolCommand`]s into [`Invocation`]s for one run context.
#[derive(Debug, Clone)]
pub struct Toolchain {
    ctx: RunContext,
    mode: EnvMode,
    captured: Option<ToolchainEnv>,
}

impl Toolchain {
    pub fn new(ctx: RunContext, mode: EnvMode) -> Self {
        Self {
            ctx,
            mode,
            captured: None,
        }
    }

    pub fn mode(&self) -> EnvMode {
        self.mode
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Whether later toolchain commands can be resolved yet
    pub fn is_established(&self) -> bool {
        match self.mode {
            EnvMode::Capture => self.captured.is_some(),
            EnvMode::Source => true,
        }
    }

    /// The invocation that runs the setup script against the build directory.
    ///
    /// In capture mode its stdout is the environment dump to feed to
    /// [`Toolchain::set_captured`].
    pub fn init_invocation(&self) -> Invocation {
        let (script, capture_stdout) = match self.mode {
            EnvMode::Capture => (CAPTURE_SCRIPT, true),
            EnvMode::Source => (INIT_SCRIPT, false),
        };
        Invocation {
            program: SHELL.to_string(),
            args: self.shell_args(script),
            cwd: self.ctx.top_dir().to_path_buf(),
            env: None,
            capture_stdout,
            display: format!(
                "source {} {}",
                self.ctx.init_script().display(),
                self.ctx.build_dir().display()
            ),
        }
    }

    /// Store the environment captured by the init invocation
    pub fn set_captured(&mut self, env: ToolchainEnv) {
        self.captured = Some(env);
    }

    pub fn captured(&self) -> Option<&ToolchainEnv> {
        self.captured.as_ref()
    }

    /// Resolve a command into the process invocation that honours its [`CommandEnv`].
    pub fn resolve(&self, cmd: &ToolCommand) -> Result<Invocation> {
        match (cmd.env, self.mode) {
            (CommandEnv::Host, _) => Ok(Invocation {
                program: cmd.program.clone(),
                args: cmd.args.clone(),
                cwd: self.ctx.top_dir().to_path_buf(),
                env: None,
                capture_stdout: false,
                display: cmd.to_string(),
            }),
            (CommandEnv::Toolchain, EnvMode::Capture) => {
                let env = self.captured.as_ref().ok_or_else(|| {
                    HookError::env_capture(format!(
                        "toolchain environment not established before `{}`",
                        cmd
                    ))
                })?;
                // The setup script leaves the shell inside the build directory
                let cwd = env
                    .build_dir()
                    .unwrap_or_else(|| self.ctx.build_dir().to_path_buf());
                Ok(Invocation {
                    program: cmd.program.clone(),
                    args: cmd.args.clone(),
                    cwd,
                    env: Some(env.vars().clone()),
                    capture_stdout: false,
                    display: cmd.to_string(),
                })
            }
            (CommandEnv::Toolchain, EnvMode::Source) => {
                let mut args = self.shell_args(WRAP_SCRIPT);
                args.push(cmd.program.clone());
                args.extend(cmd.args.iter().cloned());
                Ok(Invocation {
                    program: SHELL.to_string(),
                    args,
                    cwd: self.ctx.top_dir().to_path_buf(),
                    env: None,
                    capture_stdout: false,
                    display: format!(
                        "source {} {} && {}",
                        self.ctx.init_script().display(),
                        self.ctx.build_dir().display(),
                        cmd
                    ),
                })
            }
        }
    }

    /// `-c <script> bash <init-script> <build-dir>`
    fn shell_args(&self, script: &str) -> Vec<String> {
        vec![
            "-c".to_string(),
            script.to_string(),
            SHELL.to_string(),
            self.ctx.init_script().display().to_string(),
            self.ctx.build_dir().display().to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn ctx() -> RunContext {
        RunContext::new("/top", "build-rpi", "sources/poky/oe-init-build-env")
    }

    #[test]
    fn test_env_mode_roundtrip() {
        for mode in EnvMode::iter() {
            let parsed: EnvMode = mode.to_string().parse().unwrap();
            assert_eq!(mode, parsed);
        }
        assert_eq!(EnvMode::default(), EnvMode::Capture);
        assert_eq!(EnvMode::Source.to_string(), "source");
    }

    #[test]
    fn test_parse_env_dump() {
        let raw = b"PATH=/top/sources/poky/scripts:/usr/bin\0BUILDDIR=/top/build-rpi\0EMPTY=\0WEIRD=a=b\0";
        let env = ToolchainEnv::parse(raw).unwrap();
        assert_eq!(env.len(), 4);
        assert_eq!(
            env.get("PATH"),
            Some(OsStr::new("/top/sources/poky/scripts:/usr/bin"))
        );
        assert_eq!(env.get("EMPTY"), Some(OsStr::new("")));
        assert_eq!(env.get("WEIRD"), Some(OsStr::new("a=b")));
        assert_eq!(env.build_dir(), Some(PathBuf::from("/top/build-rpi")));
    }

    #[test]
    fn test_parse_env_allows_multiline_values() {
        let raw = b"FUNC=() {  echo hi\n}\0HOME=/root\0";
        let env = ToolchainEnv::parse(raw).unwrap();
        assert_eq!(env.get("FUNC"), Some(OsStr::new("() {  echo hi\n}")));
    }

    #[test]
    fn test_parse_env_keeps_non_utf8_bytes() {
        let env = ToolchainEnv::parse(b"PATH=/bin\0WEIRD=\xff\xfe\0").unwrap();
        assert_eq!(env.get("WEIRD").map(OsStr::as_bytes), Some(&[0xff, 0xfe][..]));
        assert_eq!(env.get("PATH"), Some(OsStr::new("/bin")));
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        assert!(ToolchainEnv::parse(b"").is_err());
        assert!(ToolchainEnv::parse(b"no-equals-sign\0").is_err());
        assert!(ToolchainEnv::parse(b"=value\0").is_err());
    }

    #[test]
    fn test_tool_command_display() {
        let cmd = ToolCommand::add_layer(Path::new("/top/sources/meta-qt6"));
        assert_eq!(cmd.to_string(), "bitbake-layers add-layer /top/sources/meta-qt6");
        assert_eq!(cmd.env, CommandEnv::Toolchain);

        let fetch = ToolCommand::run_only("core-image-coda-cluster", "fetch");
        assert_eq!(
            fetch.to_string(),
            "bitbake core-image-coda-cluster --runonly=fetch"
        );
    }

    #[test]
    fn test_capture_mode_requires_captured_env() {
        let toolchain = Toolchain::new(ctx(), EnvMode::Capture);
        assert!(!toolchain.is_established());

        let cmd = ToolCommand::add_layer(Path::new("/top/sources/meta-qt6"));
        let err = toolchain.resolve(&cmd).unwrap_err();
        assert!(matches!(err, HookError::EnvCapture(_)));
    }

    #[test]
    fn test_capture_mode_resolves_with_env_and_build_dir() {
        let mut toolchain = Toolchain::new(ctx(), EnvMode::Capture);
        let init = toolchain.init_invocation();
        assert!(init.capture_stdout);
        assert_eq!(init.program, "bash");
        assert_eq!(init.args[3], "/top/sources/poky/oe-init-build-env");
        assert_eq!(init.args[4], "/top/build-rpi");
        assert_eq!(init.cwd, PathBuf::from("/top"));

        toolchain.set_captured(ToolchainEnv::parse(b"PATH=/tc/bin\0").unwrap());
        let inv = toolchain
            .resolve(&ToolCommand::add_layer(Path::new("/top/sources/meta-oe")))
            .unwrap();
        assert_eq!(inv.program, "bitbake-layers");
        assert_eq!(inv.args, vec!["add-layer", "/top/sources/meta-oe"]);
        assert_eq!(inv.cwd, PathBuf::from("/top/build-rpi"));
        let env = inv.env.unwrap();
        assert_eq!(
            env.get(OsStr::new("PATH")).map(OsString::as_os_str),
            Some(OsStr::new("/tc/bin"))
        );
    }

    #[test]
    fn test_source_mode_wraps_in_shell() {
        let toolchain = Toolchain::new(ctx(), EnvMode::Source);
        assert!(toolchain.is_established());
        assert!(!toolchain.init_invocation().capture_stdout);

        let inv = toolchain
            .resolve(&ToolCommand::run_only("core-image-coda-cluster", "fetch"))
            .unwrap();
        assert_eq!(inv.program, "bash");
        assert_eq!(inv.args[1], WRAP_SCRIPT);
        assert_eq!(
            &inv.args[5..],
            &["bitbake", "core-image-coda-cluster", "--runonly=fetch"]
        );
        assert!(inv.env.is_none());
        assert!(inv.display.ends_with("&& bitbake core-image-coda-cluster --runonly=fetch"));
    }

    #[test]
    fn test_host_command_inherits_environment() {
        let toolchain = Toolchain::new(ctx(), EnvMode::Capture);
        let cmd = ToolCommand {
            program: "git".into(),
            args: vec!["status".into()],
            env: CommandEnv::Host,
        };
        let inv = toolchain.resolve(&cmd).unwrap();
        assert!(inv.env.is_none());
        assert_eq!(inv.cwd, PathBuf::from("/top"));
    }
}
