//! Idempotent local.conf patching.
//!
//! The settings block is appended to `conf/local.conf` at most once. Whether
//! it was already applied is decided purely by a substring search for the
//! block's sentinel line; the file's content is never parsed.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{HookError, Result};

/// Sentinel line written at the top of the stock settings block
pub const DEFAULT_SENTINEL: &str = "# --- Custom settings added by cluster-hooks ---";

/// A literal block of local.conf assignments guarded by a sentinel line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsBlock {
    /// Unique marker; its presence anywhere in the file means "already applied"
    pub sentinel: String,
    /// Lines written after the sentinel, verbatim
    pub lines: Vec<String>,
}

impl Default for SettingsBlock {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
            lines: [
                r#"MACHINE = "raspberrypi5""#,
                r#"ENABLE_UART = "1""#,
                r#"ENABLE_I2C = "1""#,
                r#"KERNEL_MODULE_AUTOLOAD:rpi += "i2c-dev i2c-bcm2708""#,
                r#"MACHINE_FEATURES:append = " vc4graphics""#,
                r#"DISTRO = "hehos""#,
                "",
                "# Enable RDP backend for Weston compositor",
                r#"PACKAGECONFIG:append:pn-weston = " rdp""#,
                "# --- End of custom settings ---",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl SettingsBlock {
    /// Create a block from a sentinel and its body lines
    pub fn new<I, S>(sentinel: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sentinel: sentinel.into(),
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// The exact text appended to local.conf.
    ///
    /// Starts with a newline so the block never fuses with an unterminated
    /// last line of the existing file.
    pub fn render(&self) -> String {
        let mut text = String::with_capacity(
            self.sentinel.len() + self.lines.iter().map(|l| l.len() + 1).sum::<usize>() + 2,
        );
        text.push('\n');
        text.push_str(&self.sentinel);
        text.push('\n');
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Returns true if `content` already carries this block's sentinel
    pub fn is_applied_to(&self, content: &str) -> bool {
        content.contains(&self.sentinel)
    }

    /// Check the block is usable as an idempotency guard
    pub fn validate(&self) -> Result<()> {
        if self.sentinel.trim().is_empty() {
            return Err(HookError::config("settings sentinel must not be empty"));
        }
        if self.sentinel.contains('\n') {
            return Err(HookError::config("settings sentinel must be a single line"));
        }
        Ok(())
    }
}

/// What the patcher did to local.conf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The block was appended
    Applied,
    /// The sentinel was already present; nothing was written
    AlreadyPresent,
    /// Dry run: the block would have been appended
    WouldApply,
}

/// Append `block` to the file at `path` unless its sentinel is already there.
///
/// The file must exist; it is never created. It is opened once for read and
/// append, so existing bytes are left untouched.
pub fn apply_settings(path: &Path, block: &SettingsBlock, dry_run: bool) -> Result<PatchOutcome> {
    let mut file = match OpenOptions::new().read(true).append(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(HookError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let mut content = String::new();
    file.read_to_string(&mut content)?;
    debug!(path = %path.display(), bytes = content.len(), "read local.conf");

    if block.is_applied_to(&content) {
        info!(path = %path.display(), "settings sentinel present, skipping");
        return Ok(PatchOutcome::AlreadyPresent);
    }

    if dry_run {
        info!(path = %path.display(), "[DRY RUN] would append settings block");
        return Ok(PatchOutcome::WouldApply);
    }

    file.write_all(block.render().as_bytes())?;
    file.flush()?;
    info!(path = %path.display(), lines = block.lines.len(), "settings block appended");
    Ok(PatchOutcome::Applied)
}
