//! Test utilities for userboot.
//!
//! [`FakePlatform`] is an in-memory [`Platform`]: a set of existing paths,
//! an environment map and a log of every call. Failures are injected per
//! path. [`TestBoot`] bundles it with settings and a boot parameter file.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use userboot_init::mount::{MountRequest, MoveRequest};
use userboot_init::{Platform, Settings};
use userboot_shared::errors::{BootError, BootResult};

/// One recorded platform call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Mount(MountRequest),
    Move(MoveRequest),
    CreateDir(PathBuf, u32),
    Remove(PathBuf),
    MarkOpaque(PathBuf),
    Spawn(PathBuf, Vec<String>),
    ExecInit(PathBuf),
    Shell(String),
    Prompt(String),
}

#[derive(Default)]
struct FakeState {
    paths: BTreeSet<PathBuf>,
    env: HashMap<String, String>,
    answers: VecDeque<String>,
    appear_after: HashMap<PathBuf, usize>,
    checks: HashMap<PathBuf, usize>,
    failing_mounts: HashSet<PathBuf>,
    failing_inits: HashSet<PathBuf>,
    failing_lookups: HashSet<PathBuf>,
    populate_on_spawn: bool,
    privileged: bool,
    calls: Vec<Call>,
}

impl FakeState {
    fn add_path(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            self.paths.insert(ancestor.to_path_buf());
        }
    }
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `path` and its ancestors exist.
    pub fn add_path(&self, path: impl AsRef<Path>) {
        self.state.lock().add_path(path.as_ref());
    }

    pub fn put_env(&self, key: &str, value: &str) {
        self.state
            .lock()
            .env
            .insert(key.to_string(), value.to_string());
    }

    pub fn env(&self, key: &str) -> Option<String> {
        self.state.lock().env.get(key).cloned()
    }

    /// Queue a console answer for the next prompt.
    pub fn answer(&self, line: &str) {
        self.state.lock().answers.push_back(line.to_string());
    }

    /// `path` starts existing on its `checks`-th existence check.
    pub fn appear_after(&self, path: impl Into<PathBuf>, checks: usize) {
        self.state.lock().appear_after.insert(path.into(), checks);
    }

    /// Mounts targeting `target` fail.
    pub fn fail_mount(&self, target: impl Into<PathBuf>) {
        self.state.lock().failing_mounts.insert(target.into());
    }

    /// Starting the init under `root` fails.
    pub fn fail_init(&self, root: impl Into<PathBuf>) {
        self.state.lock().failing_inits.insert(root.into());
    }

    /// Existence checks and listings of `path` fail with a permission error.
    pub fn fail_lookup(&self, path: impl Into<PathBuf>) {
        self.state.lock().failing_lookups.insert(path.into());
    }

    pub fn set_privileged(&self, privileged: bool) {
        self.state.lock().privileged = privileged;
    }

    /// Detached processes fill the directory given as their second argument.
    pub fn populate_on_spawn(&self, populate: bool) {
        self.state.lock().populate_on_spawn = populate;
    }

    pub fn exists_now(&self, path: impl AsRef<Path>) -> bool {
        self.state.lock().paths.contains(path.as_ref())
    }

    /// Existence checks made against `path` so far.
    pub fn checks(&self, path: impl AsRef<Path>) -> usize {
        self.state
            .lock()
            .checks
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn mounts(&self) -> Vec<MountRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Mount(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn moves(&self) -> Vec<MoveRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Move(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn inits(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::ExecInit(root) => Some(root),
                _ => None,
            })
            .collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Prompt(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Mount targets in submission order.
    pub fn mount_targets(&self) -> Vec<PathBuf> {
        self.mounts().into_iter().map(|req| req.target).collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

fn permission_denied(path: &Path) -> BootError {
    BootError::lookup(
        path,
        io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
    )
}

#[async_trait]
impl Platform for FakePlatform {
    async fn mount(&self, req: &MountRequest) -> BootResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Mount(req.clone()));
        if state.failing_mounts.contains(&req.target) {
            return Err(BootError::Mount(format!("Failed to mount {}: EBUSY", req)));
        }
        state.add_path(&req.target);
        Ok(())
    }

    async fn move_mount(&self, req: &MoveRequest) -> BootResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Move(req.clone()));

        let moved: Vec<PathBuf> = state
            .paths
            .iter()
            .filter(|path| path.starts_with(&req.source))
            .cloned()
            .collect();
        for path in moved {
            state.paths.remove(&path);
            let relative = path.strip_prefix(&req.source).unwrap_or(Path::new(""));
            let relocated = if relative.as_os_str().is_empty() {
                req.target.clone()
            } else {
                req.target.join(relative)
            };
            state.add_path(&relocated);
        }
        state.add_path(&req.target);
        Ok(())
    }

    async fn exists(&self, path: &Path) -> BootResult<bool> {
        let mut state = self.state.lock();
        if state.failing_lookups.contains(path) {
            return Err(permission_denied(path));
        }

        let checks = {
            let count = state.checks.entry(path.to_path_buf()).or_insert(0);
            *count += 1;
            *count
        };
        if let Some(&after) = state.appear_after.get(path) {
            if checks >= after {
                state.add_path(path);
            }
        }
        Ok(state.paths.contains(path))
    }

    async fn read_dir(&self, path: &Path) -> BootResult<Vec<String>> {
        let state = self.state.lock();
        if state.failing_lookups.contains(path) {
            return Err(permission_denied(path));
        }
        if !state.paths.contains(path) {
            return Err(BootError::lookup(
                path,
                io::Error::new(io::ErrorKind::NotFound, "not found"),
            ));
        }

        Ok(state
            .paths
            .iter()
            .filter(|candidate| candidate.parent() == Some(path))
            .filter_map(|child| child.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    async fn create_dir(&self, path: &Path, mode: u32) -> BootResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateDir(path.to_path_buf(), mode));
        state.add_path(path);
        Ok(())
    }

    async fn remove_path(&self, path: &Path) -> BootResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Remove(path.to_path_buf()));
        state.paths.retain(|candidate| !candidate.starts_with(path));
        Ok(())
    }

    async fn mark_opaque(&self, path: &Path) -> BootResult<()> {
        self.record(Call::MarkOpaque(path.to_path_buf()));
        Ok(())
    }

    fn is_privileged(&self) -> bool {
        self.state.lock().privileged
    }

    async fn spawn_detached(&self, program: &Path, args: &[String]) -> BootResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(Call::Spawn(program.to_path_buf(), args.to_vec()));

        if state.populate_on_spawn {
            if let Some(target) = args.get(1) {
                for node in ["console", "null", "tty"] {
                    state.add_path(&Path::new(target).join(node));
                }
            }
        }
        Ok(())
    }

    async fn exec_init(&self, root: &Path, _args: &[String]) -> BootResult<()> {
        self.record(Call::ExecInit(root.to_path_buf()));
        // Let sibling users make progress in between
        tokio::task::yield_now().await;

        if self.state.lock().failing_inits.contains(root) {
            return Err(BootError::Internal(format!(
                "{}/init: permission denied",
                root.display()
            )));
        }
        Ok(())
    }

    async fn start_shell(&self, label: &str) -> BootResult<()> {
        self.record(Call::Shell(label.to_string()));
        Ok(())
    }

    async fn prompt(&self, message: &str) -> BootResult<String> {
        let mut state = self.state.lock();
        state.calls.push(Call::Prompt(message.to_string()));
        state
            .answers
            .pop_front()
            .ok_or_else(|| BootError::Prompt("console closed".to_string()))
    }

    fn take_env(&self, key: &str) -> Option<String> {
        self.state.lock().env.remove(key)
    }

    fn remove_env(&self, key: &str) {
        self.state.lock().env.remove(key);
    }

    fn set_env(&self, key: &str, value: &str) {
        self.put_env(key, value);
    }
}

/// A fake platform, settings and a boot parameter file.
pub struct TestBoot {
    pub platform: FakePlatform,
    pub settings: Settings,
    _dir: TempDir,
}

impl TestBoot {
    /// Boot with `cmdline` as the boot parameter line.
    pub fn new(cmdline: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("cmdline");
        std::fs::write(&path, format!("{}\n", cmdline)).expect("Failed to write cmdline");

        let settings = Settings {
            cmdline: path,
            ..Settings::default()
        };

        Self {
            platform: FakePlatform::new(),
            settings,
            _dir: dir,
        }
    }

    /// Root device node plus a users-root holding `users` homes.
    ///
    /// The users-root contents only become visible at the temporary root,
    /// as if the device were already mounted there.
    pub fn with_device(self, device: &str, users: &[&str]) -> Self {
        self.platform.add_path(device);
        for user in users {
            self.platform.add_path(self.settings.temp_root.join(user));
        }
        self
    }
}
