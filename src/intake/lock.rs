//! Path Locks
//!
//! Table mapping a path to the worker processing it. Locking never waits:
//! a worker that finds the path taken moves on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Identity of a lock holder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// At most one holder per path.
#[derive(Debug, Default)]
pub struct PathLockTable {
    holders: DashMap<PathBuf, WorkerId>,
}

impl PathLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `path`. Returns `false` if anyone holds it,
    /// including `holder` itself.
    pub fn lock(&self, path: &Path, holder: &WorkerId) -> bool {
        match self.holders.entry(path.to_path_buf()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(holder.clone());
                true
            }
        }
    }

    /// Release the lock if `holder` owns it.
    pub fn unlock(&self, path: &Path, holder: &WorkerId) -> bool {
        self.holders
            .remove_if(path, |_, current| current == holder)
            .is_some()
    }

    pub fn holder(&self, path: &Path) -> Option<WorkerId> {
        self.holders.get(path).map(|h| h.clone())
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.holders.contains_key(path)
    }

    /// RAII variant of [`lock`](Self::lock).
    pub fn try_guard(self: &Arc<Self>, path: &Path, holder: &WorkerId) -> Option<PathLockGuard> {
        if self.lock(path, holder) {
            Some(PathLockGuard {
                table: Arc::clone(self),
                path: path.to_path_buf(),
                holder: holder.clone(),
            })
        } else {
            None
        }
    }
}

/// Holds a path lock until dropped.
#[derive(Debug)]
pub struct PathLockGuard {
    table: Arc<PathLockTable>,
    path: PathBuf,
    holder: WorkerId,
}

impl PathLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        self.table.unlock(&self.path, &self.holder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn test_lock_is_exclusive() {
        let table = PathLockTable::new();
        let a = WorkerId::new("worker-0");
        let b = WorkerId::new("worker-1");
        let path = Path::new("/data/x");

        assert!(table.lock(path, &a));
        assert!(!table.lock(path, &b));
        assert!(!table.lock(path, &a));
        assert_eq!(table.holder(path), Some(a.clone()));
    }

    #[test]
    fn test_only_holder_unlocks() {
        let table = PathLockTable::new();
        let a = WorkerId::new("a");
        let b = WorkerId::new("b");
        let path = Path::new("/data/x");

        assert!(table.lock(path, &a));
        assert!(!table.unlock(path, &b));
        assert!(table.is_locked(path));
        assert!(table.unlock(path, &a));
        assert!(!table.is_locked(path));
        assert!(table.lock(path, &b));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let table = Arc::new(PathLockTable::new());
        let a = WorkerId::new("a");
        let path = Path::new("/data/y");

        {
            let guard = table.try_guard(path, &a).unwrap();
            assert_eq!(guard.path(), path);
            assert!(table.try_guard(path, &WorkerId::new("b")).is_none());
        }
        assert!(!table.is_locked(path));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Property: concurrent attempts on one path yield exactly one holder.
        #[test]
        fn prop_single_holder_under_contention(threads in 2usize..8, paths in 1usize..4) {
            let table = Arc::new(PathLockTable::new());
            let barrier = Arc::new(Barrier::new(threads));
            let wins: Arc<Vec<AtomicUsize>> =
                Arc::new((0..paths).map(|_| AtomicUsize::new(0)).collect());

            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let table = Arc::clone(&table);
                    let barrier = Arc::clone(&barrier);
                    let wins = Arc::clone(&wins);
                    std::thread::spawn(move || {
                        let me = WorkerId::new(format!("worker-{}", t));
                        barrier.wait();
                        for p in 0..paths {
                            let path = PathBuf::from(format!("/p/{}", p));
                            if table.lock(&path, &me) {
                                wins[p].fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            for win in wins.iter() {
                prop_assert_eq!(win.load(Ordering::SeqCst), 1);
            }
        }
    }
}
