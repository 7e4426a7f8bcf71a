use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

type ContentDigest = [u8; 16];

/// Per-path content digests (first 128 bits of SHA-256).
///
/// Shared between the watcher task and the dispatcher; guarded by a single readers-writer lock.
#[derive(Debug, Default)]
pub struct ContentHashTracker {
    digests: RwLock<HashMap<PathBuf, ContentDigest>>,
}

impl ContentHashTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes the digest of `path` and stores it.
    ///
    /// Returns `true` when the path was unseen, its digest differs, or it could not be read.
    pub fn has_changed(&self, path: &Path) -> bool {
        let Ok(bytes) = std::fs::read(path) else {
            self.remove(path);
            return true;
        };
        let digest = digest_bytes(&bytes);

        let mut guard = match self.digests.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = guard.insert(path.to_path_buf(), digest);
        previous != Some(digest)
    }

    pub fn remove(&self, path: &Path) {
        let mut guard = match self.digests.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(path);
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        match self.digests.read() {
            Ok(guard) => guard.contains_key(path),
            Err(poisoned) => poisoned.into_inner().contains_key(path),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self.digests.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn digest_bytes(bytes: &[u8]) -> ContentDigest {
    let full = Sha256::digest(bytes);
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

#[cfg(test)]
mod tests {
    use super::ContentHashTracker;
    use std::sync::Arc;

    #[test]
    fn unseen_then_unchanged_then_changed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("README.md");
        std::fs::write(&file, "v1").expect("write");

        let tracker = ContentHashTracker::new();
        assert!(tracker.has_changed(&file), "first sighting counts as changed");
        assert!(!tracker.has_changed(&file), "same bytes are unchanged");

        std::fs::write(&file, "v1\n## Auth: JWT").expect("rewrite");
        assert!(tracker.has_changed(&file));
        assert!(!tracker.has_changed(&file));
    }

    #[test]
    fn unreadable_path_is_conservatively_changed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("gone.go");
        let tracker = ContentHashTracker::new();
        assert!(tracker.has_changed(&missing));
        assert!(tracker.has_changed(&missing));
        assert!(!tracker.contains(&missing));
    }

    #[test]
    fn remove_forgets_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("main.go");
        std::fs::write(&file, "package main").expect("write");

        let tracker = ContentHashTracker::new();
        assert!(tracker.has_changed(&file));
        tracker.remove(&file);
        assert!(tracker.is_empty());
        assert!(tracker.has_changed(&file), "removed entries are unseen again");
    }

    #[test]
    fn concurrent_use_is_safe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tracker = Arc::new(ContentHashTracker::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let file = dir.path().join(format!("f{i}.go"));
            std::fs::write(&file, format!("package f{i}")).expect("write");
            let tracker = tracker.clone();
            handles.push(std::thread::spawn(move || {
                assert!(tracker.has_changed(&file));
                assert!(!tracker.has_changed(&file));
            }));
        }
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(tracker.len(), 8);
    }
}
