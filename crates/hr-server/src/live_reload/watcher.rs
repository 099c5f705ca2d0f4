//! Build marker watcher.
//!
//! Watches the parent directory of the build marker (most platform watch APIs
//! only watch directories) and reports one change per debounced burst of
//! create/modify events on the marker itself.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::debouncer::ChangeDebouncer;

/// Why the watcher could not start or stopped running.
#[derive(Debug, thiserror::Error)]
pub(crate) enum WatchError {
    /// Target path has no file name component.
    #[error("invalid watch target: {}", .0.display())]
    InvalidTarget(PathBuf),
    /// Parent directory of the target does not exist.
    #[error("watched directory {} does not exist, watching is disabled", .0.display())]
    MissingParent(PathBuf),
    /// Error reported by the platform watch service.
    #[error("file watch failed: {0}")]
    Notify(#[from] notify::Error),
    /// The watched directory was removed or renamed.
    #[error("watched directory {} was removed or renamed", .0.display())]
    Invalidated(PathBuf),
    /// The platform watcher went away.
    #[error("file watch event channel closed")]
    Closed,
}

/// Single file being observed, split into directory and file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct WatchTarget {
    parent: PathBuf,
    file_name: OsString,
}

impl WatchTarget {
    /// Split a path into (parent, file name).
    ///
    /// A bare file name resolves to the current directory.
    pub fn resolve(path: &Path) -> Result<Self, WatchError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| WatchError::InvalidTarget(path.to_path_buf()))?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        Ok(Self {
            parent: parent.to_path_buf(),
            file_name: file_name.to_owned(),
        })
    }

    /// Full path of the watched file.
    pub fn path(&self) -> PathBuf {
        self.parent.join(&self.file_name)
    }

    /// Resolve the parent to an absolute path so it can be compared with
    /// event paths. Falls back to the path as given.
    fn canonicalize(self) -> Self {
        let parent = std::fs::canonicalize(&self.parent).unwrap_or(self.parent);
        Self { parent, ..self }
    }

    /// Whether a raw event means the watched directory itself is gone.
    ///
    /// The registration is dead afterwards: a recreated directory is not
    /// watched again.
    fn is_invalidated(&self, event: &Event) -> bool {
        let removed = matches!(
            event.kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        );
        removed && event.paths.iter().any(|p| p == &self.parent)
    }

    /// Whether a raw event signals a change of the watched file.
    fn is_change(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(self.file_name.as_os_str()))
    }
}

/// Start watching `path` in a background task.
///
/// `on_change` runs once per debounced change. The returned task runs until
/// the watch service fails; the failure is logged, never propagated.
///
/// # Errors
///
/// Returns an error if the target is invalid, its parent directory is
/// missing, or the platform watcher cannot be registered.
pub(crate) fn spawn<F>(
    path: &Path,
    debounce: Duration,
    on_change: F,
) -> Result<JoinHandle<()>, WatchError>
where
    F: Fn() + Send + 'static,
{
    let target = WatchTarget::resolve(path)?;

    if !target.parent.is_dir() {
        return Err(WatchError::MissingParent(target.parent));
    }
    let target = target.canonicalize();
    if !target.path().exists() {
        tracing::warn!(
            path = %target.path().display(),
            "Watched file does not exist yet, waiting for it to be created"
        );
    }

    let (tx, rx) = mpsc::channel::<notify::Result<Event>>(100);

    // Create watcher with callback that sends events to channel
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        // Use blocking_send since callback is sync
        let _ = tx.blocking_send(res);
    })?;
    watcher.watch(&target.parent, RecursiveMode::NonRecursive)?;

    tracing::info!(
        path = %target.path().display(),
        debounce_ms = debounce.as_millis(),
        "Watching build marker"
    );

    Ok(tokio::spawn(async move {
        // Keep the platform watcher alive for as long as the loop runs
        let _watcher = watcher;
        if let Err(err) = run(rx, target, debounce, on_change).await {
            tracing::error!(error = %err, "Build marker watcher stopped");
        }
    }))
}

/// Event loop: debounce matching events and report changes.
///
/// Returns only on failure of the watch service, including removal of the
/// watched directory.
pub(crate) async fn run<F>(
    mut events: mpsc::Receiver<notify::Result<Event>>,
    target: WatchTarget,
    debounce: Duration,
    on_change: F,
) -> Result<(), WatchError>
where
    F: Fn(),
{
    let mut debouncer = ChangeDebouncer::new(debounce);

    loop {
        let deadline = debouncer.deadline();

        tokio::select! {
            event = events.recv() => match event {
                Some(Ok(event)) => {
                    if target.is_invalidated(&event) {
                        return Err(WatchError::Invalidated(target.parent));
                    }
                    if target.is_change(&event) {
                        debouncer.record(Instant::now());
                        tracing::trace!(kind = ?event.kind, "Recorded build marker event");
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => return Err(WatchError::Closed),
            },
            () = wait_until(deadline) => {
                if let Some(coalesced) = debouncer.take_ready(Instant::now()) {
                    tracing::debug!(events = coalesced, "Build marker changed");
                    on_change();
                }
            }
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
