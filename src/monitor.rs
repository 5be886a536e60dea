//! Watches the monitored root for filesystem events, filters out metadata
//! paths and self-initiated moves, and coalesces bursts into batches.
//!
//! Grounded on `examples/original_source/backend/monitor.py`: a single
//! re-armable timer (reset on every incoming raw event) defers delivery
//! until the filesystem goes quiet for `T_debounce`; at expiry the queue is
//! drained keeping only the last event per source path.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};

use crate::config::{IGNORED_SUFFIXES, METADATA_DIR};
use crate::file_manager::FileManager;

#[derive(Debug, Clone)]
pub enum FsEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Moved { src: PathBuf, dest: PathBuf },
    Deleted(PathBuf),
}

impl FsEvent {
    /// The path used as the dedup key: source path for everything, including moves.
    fn key(&self) -> &Path {
        match self {
            FsEvent::Created(p) | FsEvent::Modified(p) | FsEvent::Deleted(p) => p,
            FsEvent::Moved { src, .. } => src,
        }
    }
}

const QUEUE_CAPACITY: usize = 4096;

struct DebounceState {
    queue: VecDeque<FsEvent>,
    timer_generation: u64,
}

pub struct Monitor {
    root: PathBuf,
    debounce: Duration,
    state: Arc<Mutex<DebounceState>>,
    file_manager: Arc<FileManager>,
    _watcher: Option<notify::RecommendedWatcher>,
}

fn is_ignored_path(root: &Path, path: &Path) -> bool {
    if path.components().any(|c| c.as_os_str() == METADATA_DIR) {
        return true;
    }
    let name = path.to_string_lossy();
    if IGNORED_SUFFIXES.iter().any(|suf| name.ends_with(suf)) {
        return true;
    }
    let _ = root;
    false
}

impl Monitor {
    /// Starts watching `root` recursively, invoking `on_batch` from a
    /// dedicated dispatcher thread whenever the debounce timer expires with
    /// a non-empty queue. The observer thread itself only enqueues events —
    /// it never runs `on_batch` inline and never blocks on I/O.
    pub fn start(
        root: impl Into<PathBuf>,
        debounce: Duration,
        file_manager: Arc<FileManager>,
        on_batch: impl Fn(Vec<FsEvent>) + Send + Sync + 'static,
    ) -> notify::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).ok();

        let state = Arc::new(Mutex::new(DebounceState {
            queue: VecDeque::new(),
            timer_generation: 0,
        }));

        let on_batch = Arc::new(on_batch);
        let state_for_watcher = state.clone();
        let fm_for_watcher = file_manager.clone();
        let root_for_watcher = root.clone();
        let debounce_dur = debounce;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            handle_raw_event(
                event,
                &root_for_watcher,
                &fm_for_watcher,
                &state_for_watcher,
                debounce_dur,
                &on_batch,
            );
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            root,
            debounce,
            state,
            file_manager,
            _watcher: Some(watcher),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn handle_raw_event(
    event: notify::Event,
    root: &Path,
    file_manager: &Arc<FileManager>,
    state: &Arc<Mutex<DebounceState>>,
    debounce: Duration,
    on_batch: &Arc<impl Fn(Vec<FsEvent>) + Send + Sync + 'static>,
) {
    let paths = &event.paths;
    if paths.is_empty() {
        return;
    }

    let fs_event = match &event.kind {
        EventKind::Create(_) => {
            let p = paths[0].clone();
            if p.is_dir() {
                return;
            }
            Some(FsEvent::Created(p))
        }
        EventKind::Modify(notify::event::ModifyKind::Name(notify::event::RenameMode::Both)) => {
            if paths.len() < 2 {
                return;
            }
            Some(FsEvent::Moved {
                src: paths[0].clone(),
                dest: paths[1].clone(),
            })
        }
        EventKind::Modify(_) => {
            let p = paths[0].clone();
            if p.is_dir() {
                return;
            }
            Some(FsEvent::Modified(p))
        }
        EventKind::Remove(_) => Some(FsEvent::Deleted(paths[0].clone())),
        _ => None,
    };

    let Some(fs_event) = fs_event else { return };

    let (src, dest) = match &fs_event {
        FsEvent::Moved { src, dest } => (src.as_path(), Some(dest.as_path())),
        FsEvent::Created(p) | FsEvent::Modified(p) | FsEvent::Deleted(p) => (p.as_path(), None),
    };

    if is_ignored_path(root, src) || dest.is_some_and(|d| is_ignored_path(root, d)) {
        return;
    }
    if file_manager.is_system_operation(src) || dest.is_some_and(|d| file_manager.is_system_operation(d)) {
        return;
    }

    let mut guard = state.lock().unwrap();
    if guard.queue.len() >= QUEUE_CAPACITY {
        guard.queue.pop_front();
    }
    guard.queue.push_back(fs_event);
    guard.timer_generation += 1;
    let my_generation = guard.timer_generation;
    drop(guard);

    let state = state.clone();
    let on_batch = on_batch.clone();
    std::thread::spawn(move || {
        std::thread::sleep(debounce);
        let mut guard = state.lock().unwrap();
        if guard.timer_generation != my_generation {
            // A newer event re-armed the timer; this thread's firing is stale.
            return;
        }
        let batch = dedup_last_per_path(std::mem::take(&mut guard.queue));
        drop(guard);
        if !batch.is_empty() {
            on_batch(batch);
        }
    });
}

fn dedup_last_per_path(queue: VecDeque<FsEvent>) -> Vec<FsEvent> {
    let mut by_key: std::collections::HashMap<PathBuf, FsEvent> = std::collections::HashMap::new();
    for event in queue {
        by_key.insert(event.key().to_path_buf(), event);
    }
    by_key.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_last_event_per_path() {
        let mut q = VecDeque::new();
        let p = PathBuf::from("/root/a.txt");
        q.push_back(FsEvent::Created(p.clone()));
        q.push_back(FsEvent::Modified(p.clone()));
        q.push_back(FsEvent::Modified(p.clone()));
        let result = dedup_last_per_path(q);
        assert_eq!(result.len(), 1);
        assert!(matches!(result[0], FsEvent::Modified(_)));
    }

    #[test]
    fn ignores_metadata_dir_and_sidecar_suffixes() {
        let root = Path::new("/root");
        assert!(is_ignored_path(root, Path::new("/root/.sefs_metadata/embeddings.db")));
        assert!(is_ignored_path(root, Path::new("/root/.sefs_metadata/embeddings.db-wal")));
        assert!(!is_ignored_path(root, Path::new("/root/Topic_0/a.txt")));
    }
}
