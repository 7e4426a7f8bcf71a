//! Tasks for TaskWing: the JSON-backed task store, reference resolution and the archive and
//! spec directories that sit next to it under `.taskwing/`.
//!
//! ```text
//! tool call ─▶ resolver::resolve ─▶ TaskStore::mutate ─▶ graph::validate ─▶ tasks.json
//!                                        │
//!                                        ├─▶ ArchiveStore (clear with archive)
//!                                        └─▶ SpecStore (generate-plan)
//! ```

pub mod archive;
mod error;
pub mod graph;
pub mod model;
pub mod query;
pub mod resolver;
pub mod specs;
pub mod store;

pub use archive::{ArchiveBundle, ArchiveEntry, ArchiveIndex, ArchiveStore, ImportReport, IndexEntry};
pub use error::{Result, TaskError};
pub use model::{NewTask, Task, TaskPatch, TaskPriority, TaskStatus};
pub use query::{board, summarize, BoardCard, BoardSnapshot, SortKey, TaskQuery, TaskSummary};
pub use resolver::{resolve, MatchKind, ReferenceMatch, Resolution};
pub use specs::{parse_checklist, GeneratedPlan, PlanRequest, Spec, SpecStore};
pub use store::{ClearScope, CurrentTask, TaskStore};

const MAX_SLUG_LEN: usize = 50;

/// Lower-case ASCII words joined by `-`, at most 50 characters; `"task"` when nothing is left.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for word in text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        let sep = usize::from(!slug.is_empty());
        if slug.len() + sep + word.len() > MAX_SLUG_LEN {
            if slug.is_empty() {
                slug.push_str(&word[..MAX_SLUG_LEN].to_ascii_lowercase());
            }
            break;
        }
        if sep == 1 {
            slug.push('-');
        }
        slug.push_str(&word.to_ascii_lowercase());
    }
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn slugify_cases() {
        assert_eq!(slugify("Ship the release!"), "ship-the-release");
        assert_eq!(slugify("  Über   café  "), "ber-caf");
        assert_eq!(slugify("???"), "task");
        let long = slugify(&"word ".repeat(30));
        assert!(long.len() <= MAX_SLUG_LEN);
        assert!(!long.ends_with('-'));
        assert_eq!(slugify(&"x".repeat(80)).len(), MAX_SLUG_LEN);
    }
}
