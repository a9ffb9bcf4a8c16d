//! Work-list parsing for training and compensation runs.
//!
//! Work lists are plain text files with one work unit per line: a single
//! feature-file path for GMM training, or two whitespace-separated paths
//! for SPLICE stereo estimation and file compensation. Blank and
//! whitespace-only lines are skipped everywhere; a pair line with any
//! other field count is an error naming the offending line.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{io_error, CompensationError, CompensationResult};

/// Reads a list of feature-file paths, one per line.
///
/// Blank and whitespace-only lines are skipped.
pub fn read_file_list(path: &Path) -> CompensationResult<Vec<PathBuf>> {
    let content = fs::read_to_string(path).map_err(|e| io_error("reading", path, e))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Reads a list of path pairs, two whitespace-separated paths per line.
///
/// Used for "noisy clean" stereo lists and "noisy output" compensation
/// lists. Blank and whitespace-only lines are skipped; any other field
/// count fails with the 1-based line number.
pub fn read_pair_list(path: &Path) -> CompensationResult<Vec<(PathBuf, PathBuf)>> {
    let content = fs::read_to_string(path).map_err(|e| io_error("reading", path, e))?;
    let mut pairs = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(CompensationError::InvalidParameter {
                parameter: format!("line {} of {}", index + 1, path.display()),
                value: format!("{} fields", fields.len()),
                constraint: "exactly two whitespace-separated paths".to_string(),
            });
        }
        pairs.push((PathBuf::from(fields[0]), PathBuf::from(fields[1])));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_list_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("train.lst");
        fs::write(&path, "a.mfc\n\n  \nb.mfc\n").unwrap();
        let files = read_file_list(&path).unwrap();
        assert_eq!(files, vec![PathBuf::from("a.mfc"), PathBuf::from("b.mfc")]);
    }

    #[test]
    fn pair_list_parses_two_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.lst");
        fs::write(&path, "n0.mfc c0.mfc\n\nn1.mfc\tc1.mfc\n").unwrap();
        let pairs = read_pair_list(&path).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].0, PathBuf::from("n1.mfc"));
        assert_eq!(pairs[1].1, PathBuf::from("c1.mfc"));
    }

    #[test]
    fn pair_list_rejects_odd_field_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.lst");
        fs::write(&path, "n0.mfc c0.mfc\nn1.mfc\n").unwrap();
        let err = read_pair_list(&path).unwrap_err();
        match err {
            CompensationError::InvalidParameter { parameter, .. } => {
                assert!(parameter.contains("line 2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
