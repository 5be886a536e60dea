//! Performs filesystem moves and remembers which paths are mid-move so the
//! Monitor can tell a system-initiated relocation apart from a user edit.
//!
//! Grounded on `examples/original_source/backend/file_ops.py`: `pending` must
//! contain both the source and destination path *before* the rename syscall
//! runs, and must stay populated for `T_settle` afterward, since the
//! debounce window containing the mirrored filesystem event needs to still
//! see it (SPEC_FULL.md §5, the central concurrency invariant).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

pub struct FileManager {
    root: PathBuf,
    pending: Arc<Mutex<HashSet<PathBuf>>>,
    settle: Duration,
}

impl FileManager {
    pub fn new(root: impl Into<PathBuf>, settle: Duration) -> Self {
        Self {
            root: root.into(),
            pending: Arc::new(Mutex::new(HashSet::new())),
            settle,
        }
    }

    pub fn is_system_operation(&self, path: &Path) -> bool {
        self.pending.lock().contains(path)
    }

    pub fn clear_pending(&self, path: &Path) {
        self.pending.lock().remove(path);
    }

    /// Moves `src` to `dst`, marking both as pending before the rename and
    /// scheduling their removal from `pending` after the settle delay.
    pub fn move_file(&self, src: &Path, dst: &Path) -> std::io::Result<()> {
        if src == dst {
            return Ok(());
        }

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }

        {
            let mut pending = self.pending.lock();
            pending.insert(src.to_path_buf());
            pending.insert(dst.to_path_buf());
        }

        let result = rename_or_copy(src, dst);

        if result.is_ok() {
            if let Some(src_parent) = src.parent() {
                if src_parent != self.root && dir_is_empty(src_parent) {
                    let _ = std::fs::remove_dir(src_parent);
                }
            }
        } else {
            // Move failed: log at the call site, clear pending immediately so
            // in-memory state doesn't drift from what's actually on disk.
            self.clear_pending(src);
            self.clear_pending(dst);
            return result;
        }

        let pending = self.pending.clone();
        let settle = self.settle;
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        std::thread::spawn(move || {
            std::thread::sleep(settle);
            let mut p = pending.lock();
            p.remove(&src);
            p.remove(&dst);
        });

        Ok(())
    }
}

fn rename_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Cross-volume rename fails with EXDEV on most platforms; fall
            // back to copy-then-delete.
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)?;
            Ok(())
        }
    }
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_is_noop_when_src_equals_dst() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path(), Duration::from_millis(50));
        let p = dir.path().join("a.txt");
        std::fs::write(&p, "x").unwrap();
        fm.move_file(&p, &p).unwrap();
        assert!(p.exists());
    }

    #[test]
    fn move_marks_pending_before_and_clears_after_settle() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path(), Duration::from_millis(50));
        let src = dir.path().join("a.txt");
        let dst_dir = dir.path().join("Topic_0");
        let dst = dst_dir.join("a.txt");
        std::fs::write(&src, "x").unwrap();

        fm.move_file(&src, &dst).unwrap();

        assert!(dst.exists());
        assert!(!src.exists());
        assert!(fm.is_system_operation(&dst));

        std::thread::sleep(Duration::from_millis(150));
        assert!(!fm.is_system_operation(&dst));
        assert!(!fm.is_system_operation(&src));
    }

    #[test]
    fn move_removes_empty_source_dir_but_not_root() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path(), Duration::from_millis(20));
        let src_dir = dir.path().join("Old_0");
        std::fs::create_dir_all(&src_dir).unwrap();
        let src = src_dir.join("a.txt");
        std::fs::write(&src, "x").unwrap();
        let dst = dir.path().join("New_1").join("a.txt");

        fm.move_file(&src, &dst).unwrap();

        assert!(!src_dir.exists());
        assert!(dir.path().exists());
    }
}
