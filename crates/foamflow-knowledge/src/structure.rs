//! Reference case directory-structure parsing.
//!
//! Structure summaries in the `case_structure` index list one block per
//! folder:
//!
//! ```text
//! <dir>directory name: system. File names in this directory: [blockMeshDict, controlDict]</dir>
//! ```

use serde::{Deserialize, Serialize};

/// One folder of a reference case and the files it holds, in listed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub folder: String,
    pub files: Vec<String>,
}

impl DirectoryEntry {
    /// Case-relative file paths (`folder/file`, or `file` for the case root).
    pub fn file_paths(&self) -> impl Iterator<Item = String> + '_ {
        self.files.iter().map(move |f| {
            if self.folder.is_empty() || self.folder == "." {
                f.clone()
            } else {
                format!("{}/{}", self.folder, f)
            }
        })
    }
}

const DIR_OPEN: &str = "<dir>";
const DIR_CLOSE: &str = "</dir>";
const NAME_KEY: &str = "directory name:";
const FILES_KEY: &str = "File names in this directory:";

/// Parse every `<dir>` block in `data`. Malformed blocks are skipped.
pub fn parse_directory_structure(data: &str) -> Vec<DirectoryEntry> {
    let mut entries = Vec::new();
    let mut rest = data;

    while let Some(start) = rest.find(DIR_OPEN) {
        let after_open = &rest[start + DIR_OPEN.len()..];
        let Some(end) = after_open.find(DIR_CLOSE) else {
            break;
        };
        if let Some(entry) = parse_block(&after_open[..end]) {
            entries.push(entry);
        }
        rest = &after_open[end + DIR_CLOSE.len()..];
    }
    entries
}

fn parse_block(block: &str) -> Option<DirectoryEntry> {
    let name_start = block.find(NAME_KEY)? + NAME_KEY.len();
    let name_tail = &block[name_start..];
    let name_end = name_tail.find(". ").or_else(|| name_tail.find(".\n"))?;
    let folder = name_tail[..name_end].trim().to_string();

    let files_start = block.find(FILES_KEY)? + FILES_KEY.len();
    let files_tail = &block[files_start..];
    let open = files_tail.find('[')?;
    let close = files_tail.find(']')?;
    if close < open {
        return None;
    }
    let files: Vec<String> = files_tail[open + 1..close]
        .split(',')
        .map(|f| f.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|f| !f.is_empty())
        .collect();

    if folder.is_empty() || files.is_empty() {
        return None;
    }
    Some(DirectoryEntry { folder, files })
}
