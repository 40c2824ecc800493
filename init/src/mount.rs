//! Mount and move requests.
//!
//! Requests are built, handed to the platform once, and dropped.

use std::fmt;
use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use userboot_shared::constants::mount;

/// One mount(2) call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountRequest {
    /// Device path, directory, or filesystem identifier (`tmpfs`, `overlay`).
    pub source: String,
    pub target: PathBuf,
    /// `None` for bind mounts.
    pub fstype: Option<String>,
    pub flags: MsFlags,
    /// Filesystem-specific options, in the order they are rendered.
    pub options: Vec<(String, String)>,
}

impl MountRequest {
    /// Mount a block device.
    pub fn device(source: impl Into<String>, target: impl Into<PathBuf>, fstype: &str) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            fstype: Some(fstype.to_string()),
            flags: MsFlags::empty(),
            options: Vec::new(),
        }
    }

    /// Expose `source` at `target`.
    pub fn bind(source: &Path, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.display().to_string(),
            target: target.into(),
            fstype: None,
            flags: MsFlags::MS_BIND,
            options: Vec::new(),
        }
    }

    /// Fresh memory-backed filesystem, no devices and no setuid.
    pub fn tmpfs(target: impl Into<PathBuf>) -> Self {
        Self {
            source: "tmpfs".to_string(),
            target: target.into(),
            fstype: Some("tmpfs".to_string()),
            flags: MsFlags::MS_NODEV | MsFlags::MS_NOSUID,
            options: Vec::new(),
        }
    }

    /// Ask the filesystem to remount read-only on errors.
    pub fn remount_ro_on_errors(self) -> Self {
        let (key, value) = mount::ERRORS_REMOUNT_RO;
        self.option(key, value)
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Options rendered as mount(2) data: `k=v,k=v`.
    pub fn data(&self) -> Option<String> {
        if self.options.is_empty() {
            return None;
        }
        Some(
            self.options
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn option_value(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for MountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.source,
            self.target.display(),
            self.fstype.as_deref().unwrap_or("bind")
        )
    }
}

/// Re-root a mounted subtree at a new location (MS_MOVE).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveRequest {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl MoveRequest {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for MoveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.source.display(), self.target.display())
    }
}

/// Copy-on-write view of `lower` with writes landing in `upper`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlaySpec {
    pub lower: PathBuf,
    pub upper: PathBuf,
    /// Scratch directory the overlay driver uses for atomic copy-up.
    pub work: PathBuf,
    pub target: PathBuf,
}

impl OverlaySpec {
    /// Overlay mount request; setuid binaries never escalate through it.
    pub fn into_request(self) -> MountRequest {
        MountRequest {
            source: "overlay".to_string(),
            target: self.target,
            fstype: Some("overlay".to_string()),
            flags: MsFlags::MS_NOSUID,
            options: Vec::new(),
        }
        .option("lowerdir", self.lower.display().to_string())
        .option("upperdir", self.upper.display().to_string())
        .option("workdir", self.work.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_request() {
        let req = OverlaySpec {
            lower: "/".into(),
            upper: "/tmp/alice".into(),
            work: "/tmp/.workdirs/alice".into(),
            target: "/tmp/alice".into(),
        }
        .into_request();

        assert_eq!(req.fstype.as_deref(), Some("overlay"));
        assert_eq!(req.flags, MsFlags::MS_NOSUID);
        assert_eq!(
            req.data().as_deref(),
            Some("lowerdir=/,upperdir=/tmp/alice,workdir=/tmp/.workdirs/alice")
        );
        assert_eq!(req.option_value("upperdir"), Some("/tmp/alice"));
    }

    #[test]
    fn test_device_request_with_failure_policy() {
        let req = MountRequest::device("/dev/vda", "/tmp", "ext4").remount_ro_on_errors();

        assert_eq!(req.flags, MsFlags::empty());
        assert_eq!(req.data().as_deref(), Some("errors=remount-ro"));
        assert_eq!(req.to_string(), "/dev/vda -> /tmp (ext4)");
    }

    #[test]
    fn test_bind_and_tmpfs_flags() {
        let bind = MountRequest::bind(Path::new("/proc"), "/root/proc");
        assert_eq!(bind.flags, MsFlags::MS_BIND);
        assert_eq!(bind.fstype, None);
        assert_eq!(bind.data(), None);

        let tmp = MountRequest::tmpfs("/root/tmp");
        assert!(tmp.flags.contains(MsFlags::MS_NODEV));
        assert!(tmp.flags.contains(MsFlags::MS_NOSUID));
    }
}
