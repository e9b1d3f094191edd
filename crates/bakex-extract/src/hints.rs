//! Allocation-hint loading.
//!
//! A hint file is a two-column CSV of `(file_id, page_id)` with an
//! optional header line. Hints are deduplicated into a set of compound
//! page keys that filters candidate pages during row streaming.

use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{info, warn};

use bakex_error::Result;
use bakex_types::page_key;

/// Load and deduplicate a hint file. Malformed lines are skipped.
pub fn load_allocation_hints(path: &Path) -> Result<HashSet<i64>> {
    let file = std::fs::File::open(path).map_err(|_| bakex_error::BakError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let reader = BufReader::new(file);

    let mut hints = HashSet::new();
    let mut header_checked = false;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !header_checked {
            header_checked = true;
            let lower = line.to_ascii_lowercase();
            if lower.contains("file_id") || lower.contains("page_id") {
                continue;
            }
        }
        match parse_hint_line(line) {
            Some(key) => {
                hints.insert(key);
            }
            None => warn!(line, "skipping malformed allocation-hint line"),
        }
    }

    info!(hints = hints.len(), path = %path.display(), "loaded allocation hints");
    Ok(hints)
}

fn parse_hint_line(line: &str) -> Option<i64> {
    let mut parts = line.splitn(3, ',');
    let file_id = parse_field(parts.next()?)?;
    let page_id = parse_field(parts.next()?)?;
    Some(page_key(file_id, page_id))
}

fn parse_field(raw: &str) -> Option<i32> {
    raw.trim().trim_matches('"').parse().ok()
}
