//! Plain-text color list ingestion, standing in for the upstream graph
//! stream: first line is the doc universe size, then one sorted doc-id list
//! per line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

/// Parsed input: universe size and the raw lists, one per class.
#[derive(Debug, Clone)]
pub struct ColorListInput {
    pub num_docs: u32,
    pub lists: Vec<Vec<u32>>,
}

/// Read a color list file.
///
/// Blank lines after the header are empty classes; they are preserved here
/// and rejected later by the encoders that cannot represent them.
pub fn read_color_lists<P: AsRef<Path>>(path: P) -> Result<ColorListInput> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let reader = BufReader::new(file);

    let mut num_docs: Option<u32> = None;
    let mut lists = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::io(path, e))?;
        let trimmed = line.trim();
        if num_docs.is_none() {
            if trimmed.is_empty() {
                continue;
            }
            let d: u32 = trimmed.parse().map_err(|_| {
                Error::Precondition(format!(
                    "{}:{}: expected the doc universe size, got {trimmed:?}",
                    path.display(),
                    line_no + 1
                ))
            })?;
            if d == 0 {
                return Err(Error::Precondition("doc universe must be non-empty".into()));
            }
            num_docs = Some(d);
            continue;
        }
        let mut list = Vec::new();
        for token in trimmed.split_whitespace() {
            let v: u32 = token.parse().map_err(|_| {
                Error::Precondition(format!(
                    "{}:{}: bad doc id {token:?}",
                    path.display(),
                    line_no + 1
                ))
            })?;
            list.push(v);
        }
        lists.push(list);
    }

    let num_docs = num_docs
        .ok_or_else(|| Error::Precondition(format!("{}: empty input", path.display())))?;
    Ok(ColorListInput { num_docs, lists })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, "8").unwrap();
        writeln!(tmp, "0 1 2").unwrap();
        writeln!(tmp, "5").unwrap();
        writeln!(tmp, "0 7").unwrap();
        let input = read_color_lists(tmp.path()).unwrap();
        assert_eq!(input.num_docs, 8);
        assert_eq!(input.lists, vec![vec![0, 1, 2], vec![5], vec![0, 7]]);
    }

    #[test]
    fn test_rejects_garbage() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, "8").unwrap();
        writeln!(tmp, "0 one 2").unwrap();
        assert!(read_color_lists(tmp.path()).is_err());
    }

    #[test]
    fn test_rejects_missing_header() {
        let tmp = NamedTempFile::new().unwrap();
        assert!(read_color_lists(tmp.path()).is_err());
    }
}
