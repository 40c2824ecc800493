//! System collaborators.
//!
//! The boot sequence touches the system only through [`Platform`]:
//! - mounts and moves
//! - directory creation, listing and removal
//! - process spawning (helpers, user inits, the recovery shell)
//! - console input and the process environment

mod linux;

use std::path::Path;

use async_trait::async_trait;
use userboot_shared::errors::BootResult;

use crate::mount::{MountRequest, MoveRequest};

pub use linux::{reap_orphans, LinuxPlatform};

/// Everything the boot sequence asks of the system.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Submit a mount. The target directory is created if missing.
    async fn mount(&self, req: &MountRequest) -> BootResult<()>;

    /// Move a mounted subtree. The target directory is created if missing.
    async fn move_mount(&self, req: &MoveRequest) -> BootResult<()>;

    /// `Ok(false)` only when `path` does not exist.
    async fn exists(&self, path: &Path) -> BootResult<bool>;

    /// Entry names of a directory.
    async fn read_dir(&self, path: &Path) -> BootResult<Vec<String>>;

    /// Create `path` and missing parents; existing directories are fine.
    async fn create_dir(&self, path: &Path, mode: u32) -> BootResult<()>;

    /// Remove a file or directory tree; missing paths are fine.
    async fn remove_path(&self, path: &Path) -> BootResult<()>;

    /// Stop lower overlay layers from showing through `path`.
    async fn mark_opaque(&self, path: &Path) -> BootResult<()>;

    /// Running with an effective uid of 0.
    fn is_privileged(&self) -> bool;

    /// Start `program` without waiting for it. Standard streams are inherited.
    async fn spawn_detached(&self, program: &Path, args: &[String]) -> BootResult<()>;

    /// Start `<root>/init` confined to `root`, as the owner of `root`.
    ///
    /// Refuses to run an init not owned by the owner of `root`.
    async fn exec_init(&self, root: &Path, args: &[String]) -> BootResult<()>;

    /// Run an interactive shell on the console until it exits.
    async fn start_shell(&self, label: &str) -> BootResult<()>;

    /// Ask a question on the console and return the answer line.
    async fn prompt(&self, message: &str) -> BootResult<String>;

    /// Read and remove an environment variable.
    fn take_env(&self, key: &str) -> Option<String>;

    fn remove_env(&self, key: &str);

    fn set_env(&self, key: &str, value: &str);
}
