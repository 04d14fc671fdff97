use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// A scratch directory holding a primary/shadow file pair, torn down on drop.
pub struct Env {
    dir: TempDir,
}

impl Env {
    pub fn new() -> Self {
        Env { dir: tempfile::tempdir().expect("failed to create scratch dir") }
    }

    pub fn primary(&self) -> PathBuf {
        self.dir.path().join("primary")
    }

    pub fn shadow(&self) -> PathBuf {
        self.dir.path().join("shadow")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Build a `Command` for the given binary, with `--primary`/`--shadow`
    /// already pointed at this env's scratch files.
    pub fn cmd(&self, bin: &str) -> Command {
        let mut cmd = Command::new(bin);
        cmd.arg("--primary").arg(self.primary()).arg("--shadow").arg(self.shadow());
        cmd
    }
}
