use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

/// Anything the reload loop can poll for changed paths without blocking.
pub trait ChangeSource {
    fn poll_event(&mut self) -> Option<PathBuf>;
}

/// Channel-fed source; lets callers push changes by hand.
impl ChangeSource for Receiver<PathBuf> {
    fn poll_event(&mut self) -> Option<PathBuf> {
        self.try_recv().ok()
    }
}

/// Watches individual files through their parent directories, since editors commonly replace
/// a file instead of writing it in place.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    targets: Vec<PathBuf>,
}

impl FileWatcher {
    pub fn new(interval: Duration) -> notify::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map(|mut watcher| {
            watcher
                .configure(Config::default().with_poll_interval(interval))
                .ok();
            watcher
        })?;
        Ok(Self {
            watcher,
            rx,
            targets: Vec::new(),
        })
    }

    pub fn watch_file(&mut self, path: &Path) -> notify::Result<()> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        self.watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        log::debug!("watching {} via {}", target.display(), dir.display());
        self.targets.push(target);
        Ok(())
    }

    fn matching_target(&self, event: &Event) -> Option<PathBuf> {
        event.paths.iter().find_map(|changed| {
            self.targets
                .iter()
                .find(|target| changed == *target || changed.file_name() == target.file_name())
                .cloned()
        })
    }
}

impl ChangeSource for FileWatcher {
    fn poll_event(&mut self) -> Option<PathBuf> {
        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => {
                    if !matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        continue;
                    }
                    if let Some(target) = self.matching_target(&event) {
                        return Some(target);
                    }
                }
                Ok(Err(err)) => log::warn!("watch error: {err}"),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("file watcher disconnected");
                    return None;
                }
            }
        }
    }
}
