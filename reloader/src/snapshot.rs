/// Point-in-time view of the working tree, built from `git status --porcelain -z`.
///
/// A snapshot maps every path git reports as changed to that file's mtime, or to
/// [`Stamp::Removed`] when the path is no longer on disk.  The controller never
/// looks inside a snapshot to decide what to do: any difference between two
/// snapshots counts as a change.
use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

/// Last-known state of a single changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    /// The path exists; its modification time.
    Modified(SystemTime),
    /// The path does not exist on disk (deleted, or the source of a rename).
    Removed,
}

impl Stamp {
    /// Stats `path`, falling back to `Removed` if it cannot be read.
    pub fn of(path: &Path) -> Self {
        match std::fs::metadata(path) {
            // Filesystems without mtime support still count as "present".
            Ok(meta) => Stamp::Modified(meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
            Err(_) => Stamp::Removed,
        }
    }
}

/// Mapping from repository-relative path to [`Stamp`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, Stamp>,
}

impl Snapshot {
    pub fn insert(&mut self, path: impl Into<String>, stamp: Stamp) {
        self.entries.insert(path.into(), stamp);
    }

    #[cfg(test)]
    pub fn get(&self, path: &str) -> Option<Stamp> {
        self.entries.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Paths whose stamp differs between `previous` and `self`, including paths
    /// present in only one of the two.  Used for log output only.
    pub fn changed_paths<'a>(&'a self, previous: &'a Snapshot) -> Vec<&'a str> {
        let mut changed: Vec<&str> = self
            .entries
            .iter()
            .filter(|(path, stamp)| previous.entries.get(*path) != Some(*stamp))
            .map(|(path, _)| path.as_str())
            .collect();
        changed.extend(
            previous
                .entries
                .keys()
                .filter(|path| !self.entries.contains_key(*path))
                .map(String::as_str),
        );
        changed.sort_unstable();
        changed
    }
}

/// Parses NUL-delimited porcelain v1 output into a snapshot.
///
/// `stamp` resolves a repository-relative path to its current [`Stamp`]; the
/// caller decides what the path is relative to.
///
/// Rename (`R`) and copy (`C`) records are followed by a second record holding
/// the source path.  A rename source is always `Removed`; a copy source still
/// exists and is stamped like any other path.
pub fn parse_porcelain<F>(output: &[u8], mut stamp: F) -> Snapshot
where
    F: FnMut(&str) -> Stamp,
{
    let mut snapshot = Snapshot::default();
    let mut records = output.split(|b| *b == 0);

    while let Some(record) = records.next() {
        // Shortest meaningful record is "XY p".
        if record.len() < 4 {
            continue;
        }
        let code = &record[..2];
        let path = String::from_utf8_lossy(&record[3..]).into_owned();

        let renamed = code.contains(&b'R');
        if renamed || code.contains(&b'C') {
            if let Some(source) = records.next().filter(|s| !s.is_empty()) {
                let source = String::from_utf8_lossy(source).into_owned();
                let source_stamp = if renamed { Stamp::Removed } else { stamp(&source) };
                snapshot.insert(source, source_stamp);
            }
        }

        let current = stamp(&path);
        snapshot.insert(path, current);
    }

    snapshot
}
