//! Linux implementation of the system collaborators.

use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use nix::mount::{mount, MsFlags};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, chroot, geteuid, setgid, setgroups, setuid, Gid, Pid, Uid};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::process::Command;
use tokio::sync::Mutex;
use userboot_shared::constants::{accounts, mount as mount_consts, paths};
use userboot_shared::errors::{BootError, BootResult};
use userboot_shared::layout::RootLayout;

use super::Platform;
use crate::mount::{MountRequest, MoveRequest};

/// Talks to the running kernel.
pub struct LinuxPlatform {
    shell: PathBuf,
    /// Shared by every prompt so lines typed ahead stay buffered.
    console: Mutex<BufReader<Stdin>>,
}

impl LinuxPlatform {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            console: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }

    fn mount_once(req: &MountRequest, fstype: Option<&str>) -> nix::Result<()> {
        let data = req.data();
        mount(
            Some(req.source.as_str()),
            req.target.as_path(),
            fstype,
            req.flags,
            data.as_deref(),
        )
    }

    /// Try every block filesystem the kernel knows, like mount(8) does
    /// for `-t auto`.
    async fn mount_auto(req: &MountRequest) -> BootResult<()> {
        let registered = tokio::fs::read_to_string(paths::FILESYSTEMS)
            .await
            .map_err(|e| BootError::lookup(paths::FILESYSTEMS, e))?;

        let mut last_err = None;
        for fstype in block_filesystems(&registered) {
            match Self::mount_once(req, Some(fstype)) {
                Ok(()) => {
                    tracing::info!(fstype, "Mounted {}", req);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(fstype, error = %e, "Probe failed for {}", req.source);
                    last_err = Some(e);
                }
            }
        }

        Err(BootError::Mount(match last_err {
            Some(e) => format!("Failed to mount {}: no filesystem matched ({})", req, e),
            None => format!("Failed to mount {}: no block filesystems registered", req),
        }))
    }
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new(paths::SHELL)
    }
}

/// Filesystem types in /proc/filesystems that need a block device.
fn block_filesystems(registered: &str) -> impl Iterator<Item = &str> {
    registered
        .lines()
        .filter(|line| !line.starts_with("nodev"))
        .map(str::trim)
        .filter(|fstype| !fstype.is_empty())
}

/// Next console line, trimmed. End of input means nobody can answer.
async fn read_answer<R>(reader: &mut R) -> BootResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| BootError::Prompt(e.to_string()))?;
    if read == 0 {
        return Err(BootError::Prompt("console closed".to_string()));
    }

    Ok(line.trim().to_string())
}

async fn ensure_mount_point(target: &Path) -> BootResult<()> {
    tokio::fs::create_dir_all(target).await.map_err(|e| {
        BootError::Mount(format!(
            "Failed to create mount point {}: {}",
            target.display(),
            e
        ))
    })
}

#[async_trait]
impl Platform for LinuxPlatform {
    async fn mount(&self, req: &MountRequest) -> BootResult<()> {
        ensure_mount_point(&req.target).await?;

        if req.fstype.as_deref() == Some(mount_consts::AUTO_FS_TYPE) {
            return Self::mount_auto(req).await;
        }

        Self::mount_once(req, req.fstype.as_deref())
            .map_err(|e| BootError::Mount(format!("Failed to mount {}: {}", req, e)))?;

        tracing::debug!("Mounted {}", req);
        Ok(())
    }

    async fn move_mount(&self, req: &MoveRequest) -> BootResult<()> {
        ensure_mount_point(&req.target).await?;

        mount(
            Some(req.source.as_path()),
            req.target.as_path(),
            None::<&str>,
            MsFlags::MS_MOVE,
            None::<&str>,
        )
        .map_err(|e| BootError::Mount(format!("Failed to move {}: {}", req, e)))?;

        tracing::debug!("Moved {}", req);
        Ok(())
    }

    async fn exists(&self, path: &Path) -> BootResult<bool> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BootError::lookup(path, e)),
        }
    }

    async fn read_dir(&self, path: &Path) -> BootResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| BootError::lookup(path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BootError::lookup(path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn create_dir(&self, path: &Path, mode: u32) -> BootResult<()> {
        tokio::fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
            .await
            .map_err(|e| BootError::lookup(path, e))
    }

    async fn remove_path(&self, path: &Path) -> BootResult<()> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(BootError::lookup(path, e)),
        };

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        result.map_err(|e| BootError::lookup(path, e))
    }

    async fn mark_opaque(&self, path: &Path) -> BootResult<()> {
        xattr::set(path, mount_consts::OPAQUE_XATTR, b"y").map_err(|e| BootError::lookup(path, e))
    }

    fn is_privileged(&self) -> bool {
        geteuid().is_root()
    }

    async fn spawn_detached(&self, program: &Path, args: &[String]) -> BootResult<()> {
        let child = Command::new(program).args(args).spawn().map_err(|e| {
            BootError::Internal(format!("Failed to spawn {}: {}", program.display(), e))
        })?;

        tracing::info!(pid = child.id(), "Spawned {}", program.display());
        Ok(())
    }

    async fn exec_init(&self, root: &Path, args: &[String]) -> BootResult<()> {
        let init = RootLayout::new(root).init_path();

        let root_meta = tokio::fs::metadata(root)
            .await
            .map_err(|e| BootError::lookup(root, e))?;
        let init_meta = tokio::fs::metadata(&init)
            .await
            .map_err(|e| BootError::lookup(&init, e))?;

        if (init_meta.uid(), init_meta.gid()) != (root_meta.uid(), root_meta.gid()) {
            return Err(BootError::Internal(format!(
                "{} is owned by {}:{}, expected {}:{}",
                init.display(),
                init_meta.uid(),
                init_meta.gid(),
                root_meta.uid(),
                root_meta.gid()
            )));
        }

        let uid = Uid::from_raw(root_meta.uid());
        let gid = Gid::from_raw(root_meta.gid());
        let jail = root.to_path_buf();

        let mut cmd = Command::new(Path::new("/").join(accounts::INIT));
        cmd.args(args).env("HOME", "/");

        // SAFETY: runs in the forked child before exec and only issues
        // syscalls.
        unsafe {
            cmd.pre_exec(move || {
                chroot(&jail)?;
                chdir("/")?;
                setgroups(&[gid])?;
                setgid(gid)?;
                setuid(uid)?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            BootError::Internal(format!("Failed to start {}: {}", init.display(), e))
        })?;

        tracing::info!(pid = child.id(), uid = uid.as_raw(), "Started {}", init.display());
        Ok(())
    }

    async fn start_shell(&self, label: &str) -> BootResult<()> {
        let status = Command::new(&self.shell)
            .env("PS1", format!("{}# ", label))
            .status()
            .await
            .map_err(|e| {
                BootError::Internal(format!("Failed to run {}: {}", self.shell.display(), e))
            })?;

        tracing::info!(%status, "Shell {} exited", label);
        Ok(())
    }

    async fn prompt(&self, message: &str) -> BootResult<String> {
        let mut console = self.console.lock().await;

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(message.as_bytes())
            .await
            .map_err(|e| BootError::Prompt(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| BootError::Prompt(e.to_string()))?;

        read_answer(&mut *console).await
    }

    fn take_env(&self, key: &str) -> Option<String> {
        let value = std::env::var(key).ok();
        std::env::remove_var(key);
        value
    }

    fn remove_env(&self, key: &str) {
        std::env::remove_var(key);
    }

    fn set_env(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }
}

/// Collect exited children forever.
///
/// Orphans are re-parented to PID 1; without this they stay zombies.
pub async fn reap_orphans(interval: Duration) {
    loop {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(_) => break,
                Ok(status) => tracing::debug!(?status, "Reaped child"),
            }
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_block_filesystems_skips_nodev() {
        let registered = "nodev\tsysfs\nnodev\ttmpfs\n\text4\n\tvfat\nnodev\toverlay\n";
        let types: Vec<_> = block_filesystems(registered).collect();
        assert_eq!(types, vec!["ext4", "vfat"]);
    }

    #[tokio::test]
    async fn test_exists() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LinuxPlatform::default();

        assert!(platform.exists(dir.path()).await.unwrap());
        assert!(!platform.exists(&dir.path().join("missing")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_through_file_is_lookup_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        let platform = LinuxPlatform::default();
        let err = platform.exists(&file.join("child")).await.unwrap_err();
        assert!(matches!(err, BootError::Lookup { .. }));
    }

    #[tokio::test]
    async fn test_create_and_list_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LinuxPlatform::default();
        let workdir = dir.path().join(".workdirs").join("alice");

        platform.create_dir(&workdir, 0o700).await.unwrap();
        // Second call is a no-op
        platform.create_dir(&workdir, 0o700).await.unwrap();

        let mode = std::fs::metadata(&workdir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let names = platform.read_dir(dir.path()).await.unwrap();
        assert_eq!(names, vec![".workdirs".to_string()]);
    }

    #[tokio::test]
    async fn test_read_dir_missing_is_lookup_error() {
        let platform = LinuxPlatform::default();
        let err = platform
            .read_dir(Path::new("/nonexistent/users"))
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::Lookup { .. }));
    }

    #[tokio::test]
    async fn test_remove_path() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LinuxPlatform::default();

        let file = dir.path().join("exclfs");
        std::fs::write(&file, b"bin").unwrap();
        let tree = dir.path().join("lib").join("exclfs");
        std::fs::create_dir_all(tree.join("nested")).unwrap();

        platform.remove_path(&file).await.unwrap();
        platform.remove_path(&dir.path().join("lib")).await.unwrap();
        platform.remove_path(&dir.path().join("missing")).await.unwrap();

        assert!(!file.exists());
        assert!(!tree.exists());
    }

    #[tokio::test]
    async fn test_answers_typed_ahead_are_kept() {
        let mut console = BufReader::new(&b"/dev/nope\n  /dev/vdb \n"[..]);

        assert_eq!(read_answer(&mut console).await.unwrap(), "/dev/nope");
        assert_eq!(read_answer(&mut console).await.unwrap(), "/dev/vdb");

        let err = read_answer(&mut console).await.unwrap_err();
        assert!(matches!(err, BootError::Prompt(ref reason) if reason == "console closed"));
    }

    #[test]
    fn test_take_env_removes_variable() {
        let platform = LinuxPlatform::default();
        let key = "USERBOOT_TEST_TAKE_ENV";
        platform.set_env(key, "/dev/vda");

        assert_eq!(platform.take_env(key).as_deref(), Some("/dev/vda"));
        assert_eq!(platform.take_env(key), None);
    }
}
