//! SQL blacklist with lock-free reads.
//!
//! The set of forbidden fingerprints lives in one of two slots; an atomic
//! index names the published slot. Readers load the index once per lookup and
//! snapshot that slot's `Arc`, so a concurrent reload yields one consistent
//! decision per call. Writers fill the inactive slot and flip the index.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use tracing::info;

use crate::sql::fingerprint;

/// Published set of forbidden statement digests.
pub type BlacklistSet = Arc<HashSet<String>>;

pub struct SqlBlacklist {
    slots: [RwLock<BlacklistSet>; 2],
    index: AtomicUsize,
}

impl SqlBlacklist {
    pub fn new() -> Self {
        Self {
            slots: [
                RwLock::new(Arc::new(HashSet::new())),
                RwLock::new(Arc::new(HashSet::new())),
            ],
            index: AtomicUsize::new(0),
        }
    }

    /// Load an initial set from a file, one statement per line. Lines are
    /// fingerprinted, so the file may hold raw or canonical statements.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let blacklist = Self::new();
        blacklist.reload_from_file(path)?;
        Ok(blacklist)
    }

    /// Re-read the blacklist file and publish the new set.
    pub fn reload_from_file(&self, path: &Path) -> std::io::Result<usize> {
        let content = fs::read_to_string(path)?;
        let set: HashSet<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(digest)
            .collect();

        let count = set.len();
        self.install(set);
        info!(path = %path.display(), entries = count, "Blacklist loaded");
        Ok(count)
    }

    /// Publish a new set: write the inactive slot, then flip the index.
    pub fn install(&self, set: HashSet<String>) {
        let next = (self.index.load(Ordering::Acquire) + 1) % 2;
        *self.slots[next].write() = Arc::new(set);
        self.index.store(next, Ordering::Release);
    }

    /// The currently-published version index.
    pub fn version(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    /// Snapshot the currently-published set.
    pub fn snapshot(&self) -> BlacklistSet {
        let index = self.index.load(Ordering::Acquire);
        self.slots[index].read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Whether a statement's fingerprint is forbidden. Reads the published
    /// index exactly once.
    pub fn contains(&self, sql: &str) -> bool {
        self.snapshot().contains(&digest(sql))
    }
}

impl Default for SqlBlacklist {
    fn default() -> Self {
        Self::new()
    }
}

fn digest(sql: &str) -> String {
    use std::fmt::Write;

    let mut hasher = Sha1::new();
    hasher.update(fingerprint(sql).as_bytes());
    let hash = hasher.finalize();
    let mut out = String::with_capacity(hash.len() * 2);
    for byte in hash {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn set_of(statements: &[&str]) -> HashSet<String> {
        statements.iter().map(|s| digest(s)).collect()
    }

    #[test]
    fn matches_literal_variants() {
        let blacklist = SqlBlacklist::new();
        blacklist.install(set_of(&["SELECT * FROM users WHERE id=?"]));

        assert!(blacklist.contains("select *  from users where id=42"));
        assert!(blacklist.contains("SELECT * FROM users WHERE id=7;"));
        assert!(!blacklist.contains("SELECT * FROM orders WHERE id=42"));
    }

    #[test]
    fn install_bumps_version_and_swaps_atomically() {
        let blacklist = SqlBlacklist::new();
        assert!(blacklist.is_empty());
        let v0 = blacklist.version();

        blacklist.install(set_of(&["DELETE FROM t"]));
        assert_ne!(blacklist.version(), v0);
        assert!(blacklist.contains("delete from t"));

        // a snapshot taken before a swap keeps answering from the old set
        let old = blacklist.snapshot();
        blacklist.install(HashSet::new());
        assert!(old.contains(&digest("DELETE FROM t")));
        assert!(!blacklist.contains("DELETE FROM t"));
    }

    #[test]
    fn loads_file_skipping_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# forbidden statements").unwrap();
        writeln!(file, "SELECT * FROM users WHERE id=?").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "drop table important").unwrap();

        let blacklist = SqlBlacklist::from_file(file.path()).unwrap();
        assert_eq!(blacklist.snapshot().len(), 2);
        assert!(blacklist.contains("select * from users where id=5"));
        assert!(blacklist.contains("DROP TABLE important"));
    }
}
