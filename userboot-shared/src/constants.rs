//! Boot constants.
//!
//! Fixed paths and budgets of the boot sequence. Runtime overrides live in
//! the init crate's `Settings`; these are its defaults.

/// Kernel boot parameters
pub mod cmdline {
    /// Kernel-exposed boot parameter line
    pub const PATH: &str = "/proc/cmdline";

    /// Root device parameter
    pub const ROOT: &str = "root";

    /// Root filesystem type parameter
    pub const ROOT_FS_TYPE: &str = "rootfstype";

    /// Single-user mode flag
    pub const SINGLE: &str = "single";

    /// Device value meaning "the environment already provides a root"
    pub const CONTAINER: &str = "container";
}

/// Environment variables
pub mod env {
    /// Root device override (the kernel forwards `root=` to init's environment)
    pub const ROOT: &str = "root";

    /// Root filesystem type override
    pub const ROOT_FS_TYPE: &str = "rootfstype";

    /// Video mode, only meaningful to the kernel
    pub const VGA: &str = "vga";

    /// Variables removed before any user init runs
    pub const BOOT_ONLY: &[&str] = &[ROOT, ROOT_FS_TYPE, VGA];

    /// Module search path variable read by user inits
    pub const MODULE_PATH: &str = "NODE_PATH";

    /// Default module search path
    pub const MODULE_PATH_VALUE: &str = "/lib/node_modules";
}

/// Mount points and boot image paths
pub mod paths {
    /// Where the root device is mounted before the administrator overlay exists
    pub const TEMP_ROOT: &str = "/tmp";

    /// Mount point of the administrator overlay
    pub const ADMIN_ROOT: &str = "/root";

    /// Device directory of the boot image
    pub const DEV: &str = "/dev";

    /// Proc filesystem of the boot image
    pub const PROC: &str = "/proc";

    /// Overlay lower layer for every user
    pub const LOWER: &str = "/";

    /// Directory marked opaque once all users are provisioned
    pub const OPAQUE: &str = "/usr";

    /// Interactive shell
    pub const SHELL: &str = "/bin/sh";

    /// Device-isolation helper binary
    pub const DEV_HELPER: &str = "/bin/exclfs";

    /// Helper files removed once the isolated /dev is populated
    pub const DEV_HELPER_FILES: &[&str] = &[DEV_HELPER, "/lib/node_modules/exclfs"];

    /// Mount utility files removed after provisioning
    pub const MOUNT_UTILS_FILES: &[&str] = &[
        "/lib/node_modules/nodeos-mount-filesystems",
        "/lib/node_modules/nodeos-mount-utils",
    ];

    /// Kernel list of registered filesystem types
    pub const FILESYSTEMS: &str = "/proc/filesystems";
}

/// User accounts
pub mod accounts {
    /// Administrator account name
    pub const ADMIN: &str = "root";

    /// Names starting with this marker are never user accounts
    pub const RESERVED_PREFIX: char = '.';

    /// fsck's recovery directory
    pub const LOST_FOUND: &str = "lost+found";

    /// Directory holding per-user overlay work directories
    pub const WORKDIRS: &str = ".workdirs";

    /// Owner-only, search permission; enough for the overlay driver
    pub const WORKDIR_MODE: u32 = 0o100;

    /// Mode of the isolated /dev mount point
    pub const DEV_MODE: u32 = 0o100;

    /// Init program inside each user's root
    pub const INIT: &str = "init";
}

/// Bounded waits
pub mod wait {
    /// Retries after the first observation
    pub const RETRIES: u32 = 5;

    /// Delay between observations, in milliseconds
    pub const INTERVAL_MS: u64 = 1000;
}

/// Mount options
pub mod mount {
    /// Filesystem type used when none is given
    pub const AUTO_FS_TYPE: &str = "auto";

    /// Failure policy for the root device
    pub const ERRORS_REMOUNT_RO: (&str, &str) = ("errors", "remount-ro");

    /// Extended attribute marking an overlay directory opaque
    pub const OPAQUE_XATTR: &str = "trusted.overlay.opaque";
}
