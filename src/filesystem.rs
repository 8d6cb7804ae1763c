//! Fallback file-system document.
//!
//! Cards without READ HEADER (USIM 1.x profiles, SIMBIOS) can't be
//! enumerated, so the caller supplies the known layout as an
//! `ArrayOfDBFile` XML export:
//!
//! ```xml
//! <ArrayOfDBFile>
//!   <DBFile>
//!     <NAME>EF_IMSI</NAME>
//!     <FILEID>6F07</FILEID>
//!     <PATH>3F00|7F20</PATH>
//!   </DBFile>
//! </ArrayOfDBFile>
//! ```
//!
//! The absolute path of an entry is `PATH` with the `|` separators
//! removed, followed by `FILEID`. Entries that don't resolve to an
//! MF-rooted path are of no use to the scanner and are skipped.

use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::file::FilePath;
use crate::Result;

#[derive(Debug, Deserialize)]
struct ArrayOfDbFile {
    #[serde(rename = "DBFile", default)]
    files: Vec<DbFile>,
}

#[derive(Debug, Deserialize)]
struct DbFile {
    #[serde(rename = "NAME")]
    name: String,
    #[serde(rename = "FILEID")]
    file_id: String,
    #[serde(rename = "PATH", default)]
    path: Option<String>,
}

/// Parses a file-system document into absolute paths, in document order.
pub fn parse(xml: &str) -> Result<Vec<FilePath>> {
    let doc: ArrayOfDbFile = quick_xml::de::from_str(xml)?;

    let mut paths = Vec::with_capacity(doc.files.len());
    for entry in &doc.files {
        let joined = format!(
            "{}{}",
            entry.path.as_deref().unwrap_or("").replace('|', ""),
            entry.file_id
        );
        match FilePath::parse(&joined) {
            Ok(path) if path.is_absolute() => paths.push(path),
            _ => warn!(
                name = %entry.name,
                path = %joined,
                "skipping non-absolute file system entry"
            ),
        }
    }
    info!("Populated {} files from the file system document", paths.len());
    Ok(paths)
}

/// Loads a file-system document from disk.
pub fn load(path: &Path) -> Result<Vec<FilePath>> {
    parse(&std::fs::read_to_string(path)?)
}
