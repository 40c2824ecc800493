//! Runtime settings.
//!
//! Paths and budgets of the boot sequence, defaulting to the values in
//! `userboot_shared::constants`.

use std::path::PathBuf;
use std::time::Duration;

use userboot_shared::constants::{cmdline, env, paths};

use crate::wait::WaitPolicy;

#[derive(Clone, Debug)]
pub struct Settings {
    /// Boot parameter line.
    pub cmdline: PathBuf,
    /// Root device mount point, later the administrator root.
    pub temp_root: PathBuf,
    /// Administrator overlay mount point.
    pub admin_root: PathBuf,
    /// Device directory of the boot image.
    pub dev_dir: PathBuf,
    /// Proc directory bound into every root.
    pub proc_dir: PathBuf,
    /// Overlay lower layer.
    pub lower_dir: PathBuf,
    /// Marked opaque after provisioning.
    pub opaque_dir: PathBuf,
    pub shell: PathBuf,
    pub dev_helper: PathBuf,
    pub dev_helper_files: Vec<PathBuf>,
    pub mount_utils_files: Vec<PathBuf>,
    /// Module search path variable and value exported to user inits.
    pub module_path: (String, String),
    pub wait: WaitPolicy,
    /// How often PID 1 collects exited orphans.
    pub reap_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cmdline: cmdline::PATH.into(),
            temp_root: paths::TEMP_ROOT.into(),
            admin_root: paths::ADMIN_ROOT.into(),
            dev_dir: paths::DEV.into(),
            proc_dir: paths::PROC.into(),
            lower_dir: paths::LOWER.into(),
            opaque_dir: paths::OPAQUE.into(),
            shell: paths::SHELL.into(),
            dev_helper: paths::DEV_HELPER.into(),
            dev_helper_files: paths::DEV_HELPER_FILES.iter().map(PathBuf::from).collect(),
            mount_utils_files: paths::MOUNT_UTILS_FILES.iter().map(PathBuf::from).collect(),
            module_path: (
                env::MODULE_PATH.to_string(),
                env::MODULE_PATH_VALUE.to_string(),
            ),
            wait: WaitPolicy::default(),
            reap_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.cmdline, PathBuf::from("/proc/cmdline"));
        assert_eq!(settings.temp_root, PathBuf::from("/tmp"));
        assert_eq!(settings.admin_root, PathBuf::from("/root"));
        assert_eq!(settings.wait.retries, 5);
        assert_eq!(settings.wait.interval, Duration::from_secs(1));
        assert!(settings.dev_helper_files.contains(&settings.dev_helper));
    }
}
