//! End-to-end tests for the synchook binary
//!
//! Each test builds a throwaway checkout with a fake `oe-init-build-env` and
//! fake `bitbake-layers`/`bitbake` executables that append their arguments
//! to `calls.log`. The real binary runs against it via `--top-dir`.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const FAKE_INIT_SCRIPT: &str = r####"# fake oe-init-build-env (sourced)
TOPDIR="$(cd "$(dirname "${BASH_SOURCE[0]}")/../.." && pwd)"
BUILDDIR="$1"
mkdir -p "$BUILDDIR/conf"
if [ -z "$FAKE_SKIP_LOCAL_CONF" ] && [ ! -f "$BUILDDIR/conf/local.conf" ]; then
    printf '# stock local.conf\nMACHINE ??= "qemux86-64"\n' > "$BUILDDIR/conf/local.conf"
fi
export BUILDDIR
export PATH="$TOPDIR/fakebin:$PATH"
export HOOK_CALL_LOG="$TOPDIR/calls.log"
echo "init $BUILDDIR" >> "$HOOK_CALL_LOG"
cd "$BUILDDIR"
echo "### Shell environment set up for builds. ###"
"####;

const FAKE_SUBTOOL: &str = r#"#!/bin/bash
echo "$(basename "$0") $*" >> "$HOOK_CALL_LOG"
if [ -n "$FAKE_FAIL_ON" ] && [[ "$*" == *"$FAKE_FAIL_ON"* ]]; then
    exit "${FAKE_FAIL_CODE:-1}"
fi
"#;

const HOOK_CONFIG: &str = r##"{
  "settings": {
    "sentinel": "# --- test hook settings ---",
    "lines": ["MACHINE = \"raspberrypi5\"", "DISTRO = \"poky\""]
  },
  "layers": ["sources/meta-a", "sources/meta-b", "sources/meta-c"],
  "prefetch": { "target": "core-image-test" }
}
"##;

/// Throwaway checkout with a fake toolchain
struct FakeCheckout {
    temp: TempDir,
}

impl FakeCheckout {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let top = temp.path();

        write(top.join("sources/poky/oe-init-build-env"), FAKE_INIT_SCRIPT, false);
        write(top.join("fakebin/bitbake-layers"), FAKE_SUBTOOL, true);
        write(top.join("fakebin/bitbake"), FAKE_SUBTOOL, true);
        write(top.join("hook.json"), HOOK_CONFIG, false);
        for layer in ["meta-a", "meta-b", "meta-c"] {
            std::fs::create_dir_all(top.join("sources").join(layer)).unwrap();
        }

        Self { temp }
    }

    fn top(&self) -> &Path {
        self.temp.path()
    }

    fn local_conf(&self) -> PathBuf {
        self.top().join("build-rpi/conf/local.conf")
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.top().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    fn hook(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("synchook");
        cmd.arg("--top-dir")
            .arg(self.top())
            .arg("--config")
            .arg(self.top().join("hook.json"))
            .env_remove("FAKE_FAIL_ON")
            .env_remove("FAKE_SKIP_LOCAL_CONF");
        cmd
    }
}

fn write(path: PathBuf, content: &str, executable: bool) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    if executable {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
    cargo_bin_cmd!("synchook")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn subcommand_help_works() {
    for sub in ["run", "patch-config", "add-layers", "prefetch", "check", "show-config"] {
        cargo_bin_cmd!("synchook")
            .arg(sub)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Usage"));
    }
}

// =============================================================================
// Full run
// =============================================================================

#[test]
fn full_run_on_fresh_checkout() {
    let checkout = FakeCheckout::new();

    checkout
        .hook()
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[Cluster Hook] Custom settings appended to local.conf.",
        ))
        .stdout(predicate::str::contains("Your build directory is 'build-rpi'."));

    let conf = std::fs::read_to_string(checkout.local_conf()).unwrap();
    assert_eq!(
        conf,
        "# stock local.conf\nMACHINE ??= \"qemux86-64\"\n\
         \n# --- test hook settings ---\nMACHINE = \"raspberrypi5\"\nDISTRO = \"poky\"\n"
    );

    let build = checkout.top().join("build-rpi");
    let top = checkout.top();
    assert_eq!(
        checkout.calls(),
        vec![
            format!("init {}", build.display()),
            format!("bitbake-layers add-layer {}", top.join("sources/meta-a").display()),
            format!("bitbake-layers add-layer {}", top.join("sources/meta-b").display()),
            format!("bitbake-layers add-layer {}", top.join("sources/meta-c").display()),
            "bitbake core-image-test --runonly=fetch".to_string(),
        ]
    );
}

#[test]
fn rerun_does_not_duplicate_settings() {
    let checkout = FakeCheckout::new();

    checkout.hook().assert().success();
    let first = std::fs::read_to_string(checkout.local_conf()).unwrap();

    checkout
        .hook()
        .assert()
        .success()
        .stdout(predicate::str::contains("Custom settings already exist in local.conf"));
    let second = std::fs::read_to_string(checkout.local_conf()).unwrap();

    assert_eq!(first, second);
    assert_eq!(second.matches("# --- test hook settings ---").count(), 1);
}

#[test]
fn source_mode_runs_same_sequence() {
    let checkout = FakeCheckout::new();

    checkout
        .hook()
        .args(["--env-mode", "source", "--no-prefetch"])
        .assert()
        .success();

    let calls = checkout.calls();
    // Setup script is sourced once for init and again for every layer
    assert_eq!(calls.iter().filter(|c| c.starts_with("init ")).count(), 4);
    let layer_calls: Vec<_> = calls
        .iter()
        .filter(|c| c.starts_with("bitbake-layers"))
        .collect();
    assert_eq!(layer_calls.len(), 3);
    assert!(!calls.iter().any(|c| c.starts_with("bitbake ")));
}

#[test]
fn run_accepts_hook_metadata() {
    let checkout = FakeCheckout::new();

    checkout
        .hook()
        .args(["run", "--repo-topdir=/somewhere", "project_list=poky"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--repo-topdir=/somewhere"));
}

// =============================================================================
// Failure paths
// =============================================================================

#[test]
fn failing_layer_exit_code_is_propagated() {
    let checkout = FakeCheckout::new();

    checkout
        .hook()
        .env("FAKE_FAIL_ON", "meta-b")
        .env("FAKE_FAIL_CODE", "7")
        .assert()
        .code(7)
        .stderr(predicate::str::contains(
            "[Cluster Hook] ERROR: Command failed with exit code 7",
        ));

    let calls = checkout.calls();
    assert!(calls.iter().any(|c| c.contains("meta-b")));
    assert!(!calls.iter().any(|c| c.contains("meta-c")));
    assert!(!calls.iter().any(|c| c.starts_with("bitbake ")));
}

#[test]
fn missing_local_conf_exits_with_one() {
    let checkout = FakeCheckout::new();

    checkout
        .hook()
        .env("FAKE_SKIP_LOCAL_CONF", "1")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("local.conf not found at"));

    assert!(!checkout.local_conf().exists());
    assert!(!checkout.calls().iter().any(|c| c.starts_with("bitbake-layers")));
}

#[test]
fn missing_init_script_fails() {
    let checkout = FakeCheckout::new();
    std::fs::remove_file(checkout.top().join("sources/poky/oe-init-build-env")).unwrap();

    checkout.hook().assert().failure();
    assert!(!checkout.local_conf().exists());
}

// =============================================================================
// Single-stage commands
// =============================================================================

#[test]
fn dry_run_changes_nothing() {
    let checkout = FakeCheckout::new();

    checkout.hook().args(["--dry-run", "add-layers"]).assert().success();
    assert!(checkout.calls().is_empty());
    assert!(!checkout.top().join("build-rpi").exists());
}

#[test]
fn dry_run_full_hook_on_fresh_checkout() {
    let checkout = FakeCheckout::new();

    checkout
        .hook()
        .args(["--dry-run", "--no-prefetch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] Custom settings would be appended"));

    assert!(checkout.calls().is_empty());
    assert!(!checkout.top().join("build-rpi").exists());
}

#[test]
fn prefetch_with_target_override() {
    let checkout = FakeCheckout::new();

    checkout
        .hook()
        .args(["prefetch", "--target", "core-image-minimal", "--task", "checkuri"])
        .assert()
        .success();

    let calls = checkout.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], "bitbake core-image-minimal --runonly=checkuri");
}

#[test]
fn patch_config_requires_existing_build_dir() {
    let checkout = FakeCheckout::new();

    checkout
        .hook()
        .arg("patch-config")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("local.conf not found"));
}

#[test]
fn check_reports_missing_layer() {
    let checkout = FakeCheckout::new();
    std::fs::remove_dir_all(checkout.top().join("sources/meta-c")).unwrap();

    checkout
        .hook()
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("meta-c"));
}

#[test]
fn show_config_prints_effective_config() {
    let checkout = FakeCheckout::new();

    checkout
        .hook()
        .args(["--no-prefetch", "show-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"prefetch\": null"))
        .stdout(predicate::str::contains("sources/meta-b"));
}

#[test]
fn init_config_writes_defaults_once() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("hook.json");

    cargo_bin_cmd!("synchook")
        .arg("init-config")
        .arg(&path)
        .assert()
        .success();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("sources/meta-raspberrypi"));
    assert!(written.contains("# --- Custom settings added by cluster-hooks ---"));

    cargo_bin_cmd!("synchook")
        .arg("init-config")
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
}
