//! Project state directory layout and crash-safe JSON persistence.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".taskwing";

#[must_use]
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR_NAME)
}

/// Writes `value` as pretty JSON to a sibling `.tmp` file, then renames it over `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Reads a JSON document; a missing file yields `None`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = state_dir(dir.path()).join("nested/state.json");
        write_json_atomic(&path, &vec![1, 2, 3]).expect("write");

        assert_eq!(read_json::<Vec<u32>>(&path).expect("read"), Some(vec![1, 2, 3]));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_or_blank_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.json");
        assert_eq!(read_json::<Vec<u32>>(&path).expect("read"), None);
        std::fs::write(&path, "  \n").expect("write");
        assert_eq!(read_json::<Vec<u32>>(&path).expect("read"), None);
        std::fs::write(&path, "{not json").expect("write");
        assert_eq!(
            read_json::<Vec<u32>>(&path).expect_err("corrupt").kind(),
            io::ErrorKind::InvalidData
        );
    }
}
