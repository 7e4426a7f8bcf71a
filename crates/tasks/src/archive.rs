//! Long-term storage for finished tasks.
//!
//! Each archived task is one file at `.taskwing/archive/YYYY/MM/<date>_<slug>.json`; the
//! sibling `index.json` lists every entry so readers never walk the tree.

use crate::model::Task;
use crate::{slugify, Result, TaskError};
use chrono::{DateTime, Datelike, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use taskwing_protocol::fsio::{read_json, state_dir, write_json_atomic};

pub const ARCHIVE_DIR_NAME: &str = "archive";
pub const INDEX_FILE_NAME: &str = "index.json";
pub const BUNDLE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub archived_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub task: Task,
}

impl ArchiveEntry {
    #[must_use]
    pub fn of(task: Task, archived_at: DateTime<Utc>) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            archived_at,
            completed_at: task.completed_at,
            task,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub archived_at: DateTime<Utc>,
    /// Relative to the archive directory.
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveIndex {
    #[serde(default)]
    pub entries: Vec<IndexEntry>,
}

/// Portable dump of a whole archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveBundle {
    pub version: u32,
    pub entries: Vec<ArchiveEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    #[must_use]
    pub fn for_root(root: &Path) -> Self {
        Self {
            dir: state_dir(root).join(ARCHIVE_DIR_NAME),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE_NAME)
    }

    pub fn index(&self) -> Result<ArchiveIndex> {
        Ok(read_json(&self.index_path())?.unwrap_or_default())
    }

    pub fn list(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.index()?.entries)
    }

    pub fn get(&self, id: &str) -> Result<ArchiveEntry> {
        let index = self.index()?;
        let Some(entry) = index.entries.iter().find(|entry| entry.id == id) else {
            return Err(TaskError::ArchiveNotFound(id.to_string()));
        };
        read_json(&self.dir.join(&entry.file))?
            .ok_or_else(|| TaskError::ArchiveNotFound(id.to_string()))
    }

    /// Archives a task now. Archiving the same id twice replaces the earlier entry.
    pub fn archive(&self, task: Task) -> Result<IndexEntry> {
        let mut index = self.index()?;
        let entry = self.write_entry(&mut index, ArchiveEntry::of(task, Utc::now()))?;
        write_json_atomic(&self.index_path(), &index)?;
        Ok(entry)
    }

    pub fn archive_all(&self, tasks: Vec<Task>) -> Result<Vec<IndexEntry>> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let mut index = self.index()?;
        let mut written = Vec::with_capacity(tasks.len());
        for task in tasks {
            written.push(self.write_entry(&mut index, ArchiveEntry::of(task, now))?);
        }
        write_json_atomic(&self.index_path(), &index)?;
        info!("archived {} task(s)", written.len());
        Ok(written)
    }

    fn write_entry(&self, index: &mut ArchiveIndex, entry: ArchiveEntry) -> Result<IndexEntry> {
        let stamp = entry.archived_at;
        let file = format!(
            "{:04}/{:02}/{}_{}.json",
            stamp.year(),
            stamp.month(),
            stamp.format("%Y-%m-%d"),
            file_slug(&entry)
        );
        write_json_atomic(&self.dir.join(&file), &entry)?;
        debug!("archived {} to {file}", entry.id);

        let indexed = IndexEntry {
            id: entry.id,
            title: entry.title,
            archived_at: stamp,
            file,
        };
        index.entries.retain(|existing| existing.id != indexed.id);
        index.entries.push(indexed.clone());
        Ok(indexed)
    }

    pub fn export_bundle(&self) -> Result<ArchiveBundle> {
        let entries = self
            .list()?
            .iter()
            .map(|entry| self.get(&entry.id))
            .collect::<Result<Vec<_>>>()?;
        Ok(ArchiveBundle {
            version: BUNDLE_VERSION,
            entries,
        })
    }

    /// Adds every bundle entry whose id is not archived yet, keeping ids and timestamps.
    pub fn import_bundle(&self, bundle: ArchiveBundle) -> Result<ImportReport> {
        if bundle.version > BUNDLE_VERSION {
            return Err(TaskError::InvalidArgument(format!(
                "archive bundle version {} is newer than supported version {BUNDLE_VERSION}",
                bundle.version
            )));
        }
        let mut index = self.index()?;
        let mut known: HashSet<String> = index.entries.iter().map(|entry| entry.id.clone()).collect();
        let mut report = ImportReport::default();
        for entry in bundle.entries {
            if !known.insert(entry.id.clone()) {
                report.skipped += 1;
                continue;
            }
            self.write_entry(&mut index, entry)?;
            report.imported += 1;
        }
        write_json_atomic(&self.index_path(), &index)?;
        Ok(report)
    }
}

/// Slug plus the short id, so equal titles archived on one day do not collide.
fn file_slug(entry: &ArchiveEntry) -> String {
    let short = entry.id.get(..8).unwrap_or(&entry.id);
    format!("{}_{short}", slugify(&entry.title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use pretty_assertions::assert_eq;

    fn done(title: &str) -> Task {
        let mut task = Task::new(title);
        task.set_status(TaskStatus::Done, Utc::now());
        task
    }

    #[test]
    fn archive_writes_dated_file_and_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = ArchiveStore::for_root(dir.path());
        let task = done("Ship the release!");

        let entry = archive.archive(task.clone()).expect("archive");
        let now = Utc::now();
        assert!(entry.file.starts_with(&format!("{:04}/{:02}/", now.year(), now.month())));
        assert!(entry.file.contains("_ship-the-release_"));
        assert!(archive.dir().join(&entry.file).is_file());

        let stored = archive.get(&task.id).expect("get");
        assert_eq!(stored.task, task);
        assert_eq!(archive.list().expect("list").len(), 1);
        assert!(matches!(archive.get("nope"), Err(TaskError::ArchiveNotFound(_))));
    }

    #[test]
    fn import_skips_known_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = ArchiveStore::for_root(dir.path());
        archive.archive(done("One")).expect("one");
        let bundle = archive.export_bundle().expect("export");

        let report = archive.import_bundle(bundle).expect("import");
        assert_eq!(report, ImportReport { imported: 0, skipped: 1 });

        let future = ArchiveBundle {
            version: BUNDLE_VERSION + 1,
            entries: Vec::new(),
        };
        assert!(matches!(
            archive.import_bundle(future),
            Err(TaskError::InvalidArgument(_))
        ));
    }
}
