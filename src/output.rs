//! Console progress lines.
//!
//! Progress goes to stdout and errors to stderr, both carrying the same tag
//! so hook output stands out in `repo sync` logs. Structured diagnostics go
//! through `tracing` separately.

use std::fmt::Display;

/// Prefix carried by every progress and error line
pub const TAG: &str = "[Cluster Hook]";

/// `[Cluster Hook] <msg>` on stdout
pub fn progress(msg: impl Display) {
    println!("{} {}", TAG, msg);
}

/// `--- [Cluster Hook] <msg> ---` on stdout
pub fn banner(msg: impl Display) {
    println!("--- {} {} ---", TAG, msg);
}

/// `[Cluster Hook] ERROR: <msg>` on stderr
pub fn failure(msg: impl Display) {
    eprintln!("{} ERROR: {}", TAG, msg);
}
