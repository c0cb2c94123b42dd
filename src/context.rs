//! Run context: the paths a hook run works against.
//!
//! Computed once at start and read-only afterwards.

use std::path::{Path, PathBuf};

/// Paths derived from the top directory of the checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    top_dir: PathBuf,
    build_dir: PathBuf,
    init_script: PathBuf,
}

impl RunContext {
    /// Build a context rooted at `top_dir`.
    ///
    /// `build_dir` and `init_script` are joined onto `top_dir` (absolute
    /// values are kept as given).
    pub fn new(
        top_dir: impl Into<PathBuf>,
        build_dir: impl AsRef<Path>,
        init_script: impl AsRef<Path>,
    ) -> Self {
        let top_dir = top_dir.into();
        Self {
            build_dir: top_dir.join(build_dir),
            init_script: top_dir.join(init_script),
            top_dir,
        }
    }

    /// Context rooted at the current process directory
    pub fn from_current_dir(
        build_dir: impl AsRef<Path>,
        init_script: impl AsRef<Path>,
    ) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?, build_dir, init_script))
    }

    pub fn top_dir(&self) -> &Path {
        &self.top_dir
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn init_script(&self) -> &Path {
        &self.init_script
    }

    /// `<build-dir>/conf`
    pub fn conf_dir(&self) -> PathBuf {
        self.build_dir.join("conf")
    }

    /// `<build-dir>/conf/local.conf`
    pub fn local_conf(&self) -> PathBuf {
        self.conf_dir().join("local.conf")
    }

    /// `<build-dir>/conf/bblayers.conf` (written only by bitbake-layers)
    pub fn bblayers_conf(&self) -> PathBuf {
        self.conf_dir().join("bblayers.conf")
    }

    /// Resolve a layer path against the top directory
    pub fn resolve_layer(&self, layer: &Path) -> PathBuf {
        self.top_dir.join(layer)
    }
}
