//! Scratch directory management
//!
//! Every scratch directory is created through a [`TempDirManager`], which
//! remembers how to remove it. Directories are reclaimed by an explicit
//! [`TempDirManager::cleanup`], by the shutdown sequence (graceful exit or an
//! interrupt signal delivered through a [`LifecycleRegistrar`]), or, as a last
//! resort, synchronously when the manager's shared state is dropped.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// Removes one scratch directory
type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, io::Result<()>> + Send>;

/// Runs before the shutdown sequence removes any directory
pub type BeforeCleanup = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recursively remove `path`, treating "already gone" as success
pub async fn remove_dir_forced(path: PathBuf) -> io::Result<()> {
    match tokio::fs::remove_dir_all(&path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove everything inside `path`, leaving an empty directory behind
pub async fn empty_directory(path: &Path) -> io::Result<()> {
    remove_dir_forced(path.to_path_buf()).await?;
    tokio::fs::create_dir_all(path).await
}

/// Keep only characters that are safe in a directory name
fn safe_prefix(prefix: &str) -> String {
    prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

struct Inner {
    root: PathBuf,
    tracked: Mutex<HashMap<PathBuf, CleanupFn>>,
    in_flight: Mutex<Option<Shared<BoxFuture<'static, ()>>>>,
    before_cleanup: Mutex<Option<BeforeCleanup>>,
    hooks_installed: AtomicBool,
}

impl Inner {
    async fn shutdown_pass(&self) {
        let hook = lock(&self.before_cleanup).clone();
        if let Some(hook) = hook {
            hook().await;
        }

        let entries: Vec<(PathBuf, CleanupFn)> = lock(&self.tracked).drain().collect();
        if !entries.is_empty() {
            info!(count = entries.len(), "Removing scratch directories");
        }
        for (path, cleanup) in entries {
            match cleanup().await {
                Ok(()) => debug!(path = %path.display(), "Removed scratch directory"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove scratch directory"),
            }
        }
    }

    fn cleanup_all_sync(&self) {
        let paths: Vec<PathBuf> = lock(&self.tracked).drain().map(|(path, _)| path).collect();
        for path in paths {
            match std::fs::remove_dir_all(&path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), error = %e, "Failed to remove scratch directory")
                }
                _ => debug!(path = %path.display(), "Removed scratch directory"),
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cleanup_all_sync();
    }
}

/// Allocates and tracks scratch directories
#[derive(Clone)]
pub struct TempDirManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TempDirManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempDirManager")
            .field("root", &self.inner.root)
            .field("tracked", &self.tracked_paths().len())
            .finish()
    }
}

impl TempDirManager {
    /// Create a manager that allocates directories under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                tracked: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(None),
                before_cleanup: Mutex::new(None),
                hooks_installed: AtomicBool::new(false),
            }),
        }
    }

    /// Directory under which scratch directories are created
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Allocate a new uniquely named directory and track it for cleanup
    pub async fn create_temp_dir(&self, prefix: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.inner.root).await?;

        let name = format!("{}{}", safe_prefix(prefix), Uuid::new_v4().simple());
        let path = self.inner.root.join(name);
        // create_dir (not create_dir_all) so a name collision is an error
        tokio::fs::create_dir(&path).await?;

        let target = path.clone();
        lock(&self.inner.tracked).insert(
            path.clone(),
            Box::new(move || remove_dir_forced(target).boxed()),
        );

        debug!(path = %path.display(), "Created scratch directory");
        Ok(path)
    }

    /// Remove a scratch directory
    ///
    /// Runs the registered cleanup if `path` is tracked. Untracked paths are
    /// removed directly only when `force` is set. Either way the path is no
    /// longer tracked afterwards.
    pub async fn cleanup(&self, path: &Path, force: bool) -> Result<()> {
        let cleanup = lock(&self.inner.tracked).remove(path);
        match cleanup {
            Some(cleanup) => cleanup().await.map_err(Error::Io)?,
            None if force => remove_dir_forced(path.to_path_buf())
                .await
                .map_err(Error::Io)?,
            None => debug!(path = %path.display(), "Cleanup requested for untracked path; skipping"),
        }
        Ok(())
    }

    /// Stop tracking `path` so it survives shutdown
    ///
    /// Returns whether the path was tracked.
    pub fn retain(&self, path: &Path) -> bool {
        let retained = lock(&self.inner.tracked).remove(path).is_some();
        if retained {
            info!(path = %path.display(), "Retaining scratch directory");
        }
        retained
    }

    /// Whether `path` is currently tracked
    pub fn is_tracked(&self, path: &Path) -> bool {
        lock(&self.inner.tracked).contains_key(path)
    }

    /// Whether `path` names a directory this manager could have allocated
    ///
    /// True for tracked paths, and for direct children of the root whose
    /// name starts with `prefix`. Paths with `.` or `..` components and the
    /// root itself never qualify.
    pub fn is_scratch_path(&self, path: &Path, prefix: &str) -> bool {
        if self.is_tracked(path) {
            return true;
        }
        let plain = path.components().all(|c| {
            !matches!(c, Component::CurDir | Component::ParentDir)
        });
        let prefix = safe_prefix(prefix);
        plain
            && !prefix.is_empty()
            && path.parent() == Some(self.root())
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.len() > prefix.len() && name.starts_with(&prefix))
    }

    /// Paths currently tracked
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        lock(&self.inner.tracked).keys().cloned().collect()
    }

    /// Set the hook that runs before the shutdown sequence removes directories
    pub fn set_before_cleanup(&self, hook: Option<BeforeCleanup>) {
        *lock(&self.inner.before_cleanup) = hook;
    }

    /// Install process shutdown handling through `registrar`
    ///
    /// The registrar is invoked at most once per manager; later calls only
    /// replace the hook.
    pub fn setup_process_cleanup(
        &self,
        registrar: &dyn LifecycleRegistrar,
        before_cleanup: Option<BeforeCleanup>,
    ) {
        self.set_before_cleanup(before_cleanup);
        if self.inner.hooks_installed.swap(true, Ordering::SeqCst) {
            debug!("Process cleanup hooks already installed");
            return;
        }
        registrar.install(ShutdownHandle {
            inner: Arc::downgrade(&self.inner),
        });
    }

    /// Run the hook and remove every tracked directory
    ///
    /// Concurrent callers share a single in-flight pass.
    pub async fn run_shutdown_sequence(&self) {
        let pass = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.as_ref() {
                Some(pass) => pass.clone(),
                None => {
                    let weak = Arc::downgrade(&self.inner);
                    let pass = async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.shutdown_pass().await;
                        }
                    }
                    .boxed()
                    .shared();
                    *in_flight = Some(pass.clone());
                    pass
                }
            }
        };

        pass.clone().await;

        let mut in_flight = lock(&self.inner.in_flight);
        if in_flight.as_ref().is_some_and(|current| current.ptr_eq(&pass)) {
            *in_flight = None;
        }
    }

    /// Remove every tracked directory without awaiting
    pub fn cleanup_all_sync(&self) {
        self.inner.cleanup_all_sync();
    }
}

/// Entry point handed to a [`LifecycleRegistrar`]
///
/// Holds only a weak reference, so an installed handler never keeps the
/// manager alive.
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Weak<Inner>,
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl ShutdownHandle {
    /// Run the shared shutdown sequence
    pub async fn run(&self) {
        if let Some(inner) = self.inner.upgrade() {
            TempDirManager { inner }.run_shutdown_sequence().await;
        }
    }

    /// Synchronous last-resort removal
    pub fn run_sync(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.cleanup_all_sync();
        }
    }
}

/// Hooks process lifecycle events up to the shutdown sequence
pub trait LifecycleRegistrar: Send + Sync {
    /// Arrange for `shutdown` to run on the relevant process events
    fn install(&self, shutdown: ShutdownHandle);
}

/// Exit status used after an interrupt (128 + SIGINT)
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Registrar that runs the shutdown sequence on Ctrl-C / SIGTERM and then
/// exits with [`INTERRUPTED_EXIT_CODE`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalRegistrar;

async fn wait_for_interrupt() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

impl LifecycleRegistrar for SignalRegistrar {
    fn install(&self, shutdown: ShutdownHandle) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; interrupt cleanup not installed");
            return;
        };
        runtime.spawn(async move {
            wait_for_interrupt().await;
            warn!("Interrupted; cancelling clones and removing scratch directories");
            shutdown.run().await;
            shutdown.run_sync();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_unique_tracked_dirs() {
        let root = TempDir::new().unwrap();
        let manager = TempDirManager::new(root.path());

        let a = manager.create_temp_dir("repofetch-test-").await.unwrap();
        let b = manager.create_temp_dir("repofetch-test-").await.unwrap();

        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
        assert!(a.starts_with(root.path()));
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("repofetch-test-"));
        assert!(manager.is_tracked(&a));
        assert_eq!(manager.tracked_paths().len(), 2);
    }

    #[tokio::test]
    async fn test_prefix_is_sanitized() {
        let root = TempDir::new().unwrap();
        let manager = TempDirManager::new(root.path());
        let path = manager.create_temp_dir("../escape/").await.unwrap();
        assert_eq!(path.parent().unwrap(), root.path());
    }

    #[tokio::test]
    async fn test_cleanup_tracked() {
        let root = TempDir::new().unwrap();
        let manager = TempDirManager::new(root.path());
        let path = manager.create_temp_dir("t-").await.unwrap();
        std::fs::write(path.join("file.txt"), "data").unwrap();

        manager.cleanup(&path, false).await.unwrap();
        assert!(!path.exists());
        assert!(!manager.is_tracked(&path));
    }

    #[tokio::test]
    async fn test_cleanup_untracked_requires_force() {
        let root = TempDir::new().unwrap();
        let manager = TempDirManager::new(root.path());
        let stray = root.path().join("stray");
        std::fs::create_dir(&stray).unwrap();

        manager.cleanup(&stray, false).await.unwrap();
        assert!(stray.exists());

        manager.cleanup(&stray, true).await.unwrap();
        assert!(!stray.exists());

        // Already gone is fine
        manager.cleanup(&stray, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_is_scratch_path() {
        let root = TempDir::new().unwrap();
        let manager = TempDirManager::new(root.path());
        let tracked = manager.create_temp_dir("other-").await.unwrap();
        let retained = manager.create_temp_dir("repofetch-r-").await.unwrap();
        manager.retain(&retained);

        assert!(manager.is_scratch_path(&tracked, "repofetch-"));
        assert!(manager.is_scratch_path(&retained, "repofetch-"));

        assert!(!manager.is_scratch_path(root.path(), "repofetch-"));
        assert!(!manager.is_scratch_path(&root.path().join("repofetch-"), "repofetch-"));
        assert!(!manager.is_scratch_path(&root.path().join("victim"), "repofetch-"));
        assert!(!manager.is_scratch_path(
            &root.path().join("..").join("repofetch-x"),
            "repofetch-"
        ));
        assert!(!manager.is_scratch_path(
            &root.path().join("repofetch-x").join("nested"),
            "repofetch-"
        ));
        assert!(!manager.is_scratch_path(&root.path().join("repofetch-x"), ""));
    }

    #[tokio::test]
    async fn test_retain_survives_shutdown() {
        let root = TempDir::new().unwrap();
        let manager = TempDirManager::new(root.path());
        let kept = manager.create_temp_dir("keep-").await.unwrap();
        let dropped = manager.create_temp_dir("drop-").await.unwrap();

        assert!(manager.retain(&kept));
        assert!(!manager.retain(&kept));
        manager.run_shutdown_sequence().await;

        assert!(kept.exists());
        assert!(!dropped.exists());
    }

    #[tokio::test]
    async fn test_hook_runs_before_removal() {
        let root = TempDir::new().unwrap();
        let manager = TempDirManager::new(root.path());
        let path = manager.create_temp_dir("t-").await.unwrap();

        let saw_dir = Arc::new(AtomicBool::new(false));
        let flag = saw_dir.clone();
        let observed = path.clone();
        manager.set_before_cleanup(Some(Arc::new(move || {
            let flag = flag.clone();
            let observed = observed.clone();
            async move {
                flag.store(observed.exists(), Ordering::SeqCst);
            }
            .boxed()
        })));

        manager.run_shutdown_sequence().await;
        assert!(saw_dir.load(Ordering::SeqCst));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_concurrent_shutdown_shares_one_pass() {
        let root = TempDir::new().unwrap();
        let manager = TempDirManager::new(root.path());
        manager.create_temp_dir("t-").await.unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        manager.set_before_cleanup(Some(Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            .boxed()
        })));

        tokio::join!(
            manager.run_shutdown_sequence(),
            manager.run_shutdown_sequence(),
            manager.run_shutdown_sequence()
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // A later trigger starts a fresh pass
        manager.run_shutdown_sequence().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_drop_removes_remaining_dirs() {
        let root = TempDir::new().unwrap();
        let path = {
            let manager = TempDirManager::new(root.path());
            manager.create_temp_dir("t-").await.unwrap()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("work");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested/file"), "x").unwrap();

        empty_directory(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[derive(Default)]
    struct CapturingRegistrar {
        installed: Mutex<Vec<ShutdownHandle>>,
    }

    impl LifecycleRegistrar for CapturingRegistrar {
        fn install(&self, shutdown: ShutdownHandle) {
            self.installed.lock().unwrap().push(shutdown);
        }
    }

    #[tokio::test]
    async fn test_registrar_installed_once_and_handle_runs() {
        let root = TempDir::new().unwrap();
        let manager = TempDirManager::new(root.path());
        let registrar = CapturingRegistrar::default();

        manager.setup_process_cleanup(&registrar, None);
        manager.setup_process_cleanup(&registrar, None);
        assert_eq!(registrar.installed.lock().unwrap().len(), 1);

        let path = manager.create_temp_dir("t-").await.unwrap();
        let handle = registrar.installed.lock().unwrap()[0].clone();
        handle.run().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_handle_does_not_keep_manager_alive() {
        let root = TempDir::new().unwrap();
        let registrar = CapturingRegistrar::default();
        {
            let manager = TempDirManager::new(root.path());
            manager.setup_process_cleanup(&registrar, None);
        }
        let handle = registrar.installed.lock().unwrap()[0].clone();
        handle.run().await;
        handle.run_sync();
    }
}
