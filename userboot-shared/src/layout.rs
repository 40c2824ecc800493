//! Filesystem layout definitions.
//!
//! This module provides layout structs for the two trees the boot sequence
//! builds:
//! - `UsersLayout`: the users-root directory (one home per account)
//! - `RootLayout`: a root filesystem that gets /proc, /tmp and /dev mounted

use std::path::{Path, PathBuf};

use crate::constants::accounts;

/// Kernel filesystem directory names inside a root.
pub mod dirs {
    /// Proc mount point
    pub const PROC: &str = "proc";

    /// Ephemeral scratch mount point
    pub const TMP: &str = "tmp";

    /// Device mount point
    pub const DEV: &str = "dev";

    /// Relocated users-root inside the administrator root
    pub const HOME: &str = "home";
}

// ============================================================================
// USERS LAYOUT
// ============================================================================

/// Layout of the users-root directory.
///
/// ```text
/// {root}/
/// ├── .workdirs/
/// │   ├── alice/          # overlay workdir for alice
/// │   └── root/           # overlay workdir for the administrator
/// ├── alice/              # alice's upperdir, overlay mounted on top
/// └── root/               # administrator upperdir
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsersLayout {
    root: PathBuf,
}

impl UsersLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The users-root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Home (overlay upperdir): {root}/{user}
    pub fn home(&self, user: &str) -> PathBuf {
        self.root.join(user)
    }

    /// Work directories: {root}/.workdirs
    pub fn workdirs(&self) -> PathBuf {
        self.root.join(accounts::WORKDIRS)
    }

    /// Overlay workdir: {root}/.workdirs/{user}
    pub fn workdir(&self, user: &str) -> PathBuf {
        self.workdirs().join(user)
    }
}

// ============================================================================
// ROOT LAYOUT
// ============================================================================

/// Kernel filesystems of a root filesystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootLayout {
    root: PathBuf,
}

impl RootLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// {root}/proc
    pub fn proc_dir(&self) -> PathBuf {
        self.root.join(dirs::PROC)
    }

    /// {root}/tmp
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(dirs::TMP)
    }

    /// {root}/dev
    pub fn dev_dir(&self) -> PathBuf {
        self.root.join(dirs::DEV)
    }

    /// {root}/home
    pub fn home_dir(&self) -> PathBuf {
        self.root.join(dirs::HOME)
    }

    /// {root}/init
    pub fn init_path(&self) -> PathBuf {
        self.root.join(accounts::INIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_users_layout_paths() {
        let users = UsersLayout::new("/tmp");

        assert_eq!(users.root().to_str().unwrap(), "/tmp");
        assert_eq!(users.home("alice").to_str().unwrap(), "/tmp/alice");
        assert_eq!(users.workdirs().to_str().unwrap(), "/tmp/.workdirs");
        assert_eq!(
            users.workdir("alice").to_str().unwrap(),
            "/tmp/.workdirs/alice"
        );
    }

    #[test]
    fn test_root_layout_paths() {
        let root = RootLayout::new("/tmp/alice");

        assert_eq!(root.proc_dir().to_str().unwrap(), "/tmp/alice/proc");
        assert_eq!(root.tmp_dir().to_str().unwrap(), "/tmp/alice/tmp");
        assert_eq!(root.dev_dir().to_str().unwrap(), "/tmp/alice/dev");
        assert_eq!(root.home_dir().to_str().unwrap(), "/tmp/alice/home");
        assert_eq!(root.init_path().to_str().unwrap(), "/tmp/alice/init");
    }

    #[test]
    fn test_rebound_users_layout_nests_under_home() {
        let admin = RootLayout::new("/tmp");
        let users = UsersLayout::new(admin.home_dir());

        assert_eq!(users.home("bob").to_str().unwrap(), "/tmp/home/bob");
        assert_eq!(
            users.workdir("bob").to_str().unwrap(),
            "/tmp/home/.workdirs/bob"
        );
    }
}
