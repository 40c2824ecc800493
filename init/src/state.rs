//! Process-wide boot state.
//!
//! Threaded explicitly through every stage. The users-root starts at the
//! temporary root mount point and may be rebound exactly once, by the
//! administrator stage, before any regular user is provisioned.

use std::path::{Path, PathBuf};

use userboot_shared::errors::{BootError, BootResult};
use userboot_shared::layout::UsersLayout;

use crate::cmdline::BootConfig;

#[derive(Debug)]
pub struct BootState {
    config: BootConfig,
    temp_root: PathBuf,
    rebound: Option<PathBuf>,
    single_user: bool,
}

impl BootState {
    pub fn new(config: BootConfig, temp_root: impl Into<PathBuf>) -> Self {
        let single_user = config.single_user();
        Self {
            config,
            temp_root: temp_root.into(),
            rebound: None,
            single_user,
        }
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    /// Only the interactive root-device correction writes here.
    pub fn config_mut(&mut self) -> &mut BootConfig {
        &mut self.config
    }

    /// Where the root device is mounted, and later the administrator root.
    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Directory holding one home per user account.
    pub fn users_root(&self) -> &Path {
        self.rebound.as_deref().unwrap_or(&self.temp_root)
    }

    pub fn users(&self) -> UsersLayout {
        UsersLayout::new(self.users_root())
    }

    /// Point every later users-root reference at `users_root`.
    pub fn rebind(&mut self, users_root: impl Into<PathBuf>) -> BootResult<()> {
        if let Some(current) = &self.rebound {
            return Err(BootError::Internal(format!(
                "users root already rebound to {}",
                current.display()
            )));
        }
        self.rebound = Some(users_root.into());
        Ok(())
    }

    pub fn single_user(&self) -> bool {
        self.single_user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_users_root_starts_at_temp_root() {
        let state = BootState::new(BootConfig::decode("root=/dev/vda"), "/tmp");

        assert_eq!(state.users_root(), Path::new("/tmp"));
        assert_eq!(state.users().workdir("alice"), Path::new("/tmp/.workdirs/alice"));
        assert!(!state.single_user());
    }

    #[test]
    fn test_rebind_once() {
        let mut state = BootState::new(BootConfig::default(), "/tmp");

        state.rebind("/tmp/home").unwrap();
        assert_eq!(state.users_root(), Path::new("/tmp/home"));
        assert_eq!(state.users().home("alice"), Path::new("/tmp/home/alice"));
        assert_eq!(state.temp_root(), Path::new("/tmp"));

        let err = state.rebind("/elsewhere").unwrap_err();
        assert!(matches!(err, BootError::Internal(_)));
        assert_eq!(state.users_root(), Path::new("/tmp/home"));
    }

    #[test]
    fn test_single_user_from_cmdline() {
        let state = BootState::new(BootConfig::decode("single"), "/tmp");
        assert!(state.single_user());
    }
}
