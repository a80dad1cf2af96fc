// Input files: one `docId,database` pair per line, grouped by database
use crate::constants;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Document ids to purge from one database, in input order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentGroup {
    pub database: String,
    pub document_ids: Vec<String>,
}

/// List the regular files of an input directory, sorted by name
pub fn list_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read input directory {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Read an input file into groups, one per database in order of first appearance
pub fn read_groups(path: impl AsRef<Path>) -> Result<Vec<DocumentGroup>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    parse_groups(BufReader::new(file)).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn parse_groups<R: BufRead>(reader: R) -> Result<Vec<DocumentGroup>> {
    let mut groups: Vec<DocumentGroup> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with(constants::INPUT_HEADER_PREFIX) {
            continue;
        }

        let mut columns = line.split(',');
        let doc_id = columns.next().unwrap_or_default().trim();
        let database = columns.next().unwrap_or_default().trim();
        if doc_id.is_empty() || database.is_empty() {
            log::warn!("Skipping malformed line {}: {:?}", line_num + 1, line);
            continue;
        }

        let index = *positions.entry(database.to_string()).or_insert_with(|| {
            groups.push(DocumentGroup {
                database: database.to_string(),
                document_ids: Vec::new(),
            });
            groups.len() - 1
        });
        groups[index].document_ids.push(doc_id.to_string());
    }

    Ok(groups)
}
