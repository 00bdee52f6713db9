//! Markup snapshot storage.
//!
//! A `/snapshot` body is `<name>\r\n<markup>`. The markup gets the same
//! scrubbing the debugger UI expects before saving: stray `'=""` serializer
//! artifacts and self-closed `<script .../>` elements are removed. Only the
//! file stem of the submitted name is used, so a client cannot escape the
//! snapshot directory.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot body carries no name line")]
    MissingName,
    #[error("writing snapshot: {0}")]
    Io(#[from] std::io::Error),
}

/// Store one snapshot; returns the path written.
pub fn store(dir: &Path, raw: &str) -> Result<PathBuf, SnapshotError> {
    let (name, markup) = raw.split_once("\r\n").ok_or(SnapshotError::MissingName)?;
    let stem = Path::new(name.trim())
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or(SnapshotError::MissingName)?;
    let path = dir.join(format!("{stem}.xml"));
    std::fs::write(&path, scrub_markup(markup))?;
    Ok(path)
}

/// Remove serializer artifacts and self-closed script elements.
fn scrub_markup(markup: &str) -> String {
    let cleaned = markup.replace("'=\"\"", "");
    let mut out = String::with_capacity(cleaned.len());
    let mut rest = cleaned.as_str();
    while let Some(start) = rest.find("<script") {
        let (before, tail) = rest.split_at(start);
        out.push_str(before);
        match tail.find('>') {
            Some(end) if tail.as_bytes()[end - 1] == b'/' => {
                // self-closed: drop the element and the whitespace after it
                rest = tail[end + 1..].trim_start_matches([' ', '\r', '\n']);
            }
            Some(end) => {
                out.push_str(&tail[..=end]);
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
