//! Card file system data model.
//!
//! TS 102 221 arranges files as a tree: the Master File (MF, always FID
//! 3F00) at the root, Dedicated Files (DFs) as directories and Elementary
//! Files (EFs) as leaves. A file is addressed by the chain of 2-byte FIDs
//! from the MF down, which this module calls a [`FilePath`].
//!
//! The scanner accumulates everything it learns about a file in a
//! [`FileRecord`]. Fields are optional on purpose: the 2G pass fills what
//! the legacy SELECT response carries, the 3G pass fills only what is still
//! absent, and some cards simply never disclose some attributes.

use crate::{util, Error, Result};
use num_enum::TryFromPrimitive;
use std::fmt;

/// Absolute path of a file: the FID chain from the MF down, as raw bytes.
/// Always non-empty and of even length; always starts at the MF.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilePath(Vec<u8>);

/// FID of the Master File.
pub const MF_FID: [u8; 2] = [0x3F, 0x00];

impl FilePath {
    /// The root path, `3F00`.
    pub fn mf() -> Self {
        Self(MF_FID.to_vec())
    }

    /// Parses a hex path like `"3F007F206F07"` (dirty hex tolerated).
    /// Anything that isn't a whole chain of 2-byte FIDs is rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let clean = util::filter(s);
        if clean.is_empty() || clean.len() % 4 != 0 {
            return Err(Error::InvalidPath(s.into()));
        }
        Ok(Self(util::parse(&clean)))
    }

    /// Number of FIDs in the chain.
    pub fn depth(&self) -> usize {
        self.0.len() / 2
    }

    /// The n-th FID of the chain.
    pub fn fid(&self, n: usize) -> [u8; 2] {
        [self.0[n * 2], self.0[n * 2 + 1]]
    }

    /// The terminal FID.
    pub fn last_fid(&self) -> [u8; 2] {
        self.fid(self.depth() - 1)
    }

    pub fn is_mf(&self) -> bool {
        self.0 == MF_FID
    }

    /// Whether this path is rooted at the MF.
    pub fn is_absolute(&self) -> bool {
        self.0.starts_with(&MF_FID)
    }

    /// Path of a child file under this directory.
    pub fn child(&self, fid: [u8; 2]) -> Self {
        let mut bytes = self.0.clone();
        bytes.extend_from_slice(&fid);
        Self(bytes)
    }

    /// Path of the parent directory; `None` for the MF.
    pub fn parent(&self) -> Option<Self> {
        if self.depth() < 2 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 2].to_vec()))
    }

    /// Continuous hex form, `"3F007F20"`.
    pub fn hex(&self) -> String {
        util::encode(&self.0)
    }
}

impl fmt::Display for FilePath {
    /// Formats the path sliced per FID: `3F00/7F20/6F07`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for n in 0..self.depth() {
            if n > 0 {
                write!(f, "/")?;
            }
            let fid = self.fid(n);
            write!(f, "{:02X}{:02X}", fid[0], fid[1])?;
        }
        Ok(())
    }
}

/// File type byte as coded in legacy SELECT responses (byte 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FileType {
    Mf = 0x01,
    Df = 0x02,
    Ef = 0x04,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Mf => "MF",
            Self::Df => "DF",
            Self::Ef => "EF",
        })
    }
}

/// EF storage structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStructure {
    Transparent,
    LinearFixed,
    Cyclic,
}

impl FileStructure {
    /// Whether records (as opposed to a flat byte body) are read.
    pub fn is_record_based(&self) -> bool {
        matches!(self, Self::LinearFixed | Self::Cyclic)
    }

    /// Legacy coding: SELECT response byte 13.
    pub fn from_legacy(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Transparent),
            0x01 => Some(Self::LinearFixed),
            0x03 => Some(Self::Cyclic),
            _ => None,
        }
    }

    /// FCP coding: low bits of the file descriptor byte. Cyclic (0b110)
    /// must be tested before linear fixed (0b010), which it contains.
    pub fn from_descriptor(b: u8) -> Option<Self> {
        if b & 0x06 == 0x06 {
            Some(Self::Cyclic)
        } else if b & 0x02 == 0x02 {
            Some(Self::LinearFixed)
        } else if b & 0x01 == 0x01 {
            Some(Self::Transparent)
        } else {
            None
        }
    }
}

impl fmt::Display for FileStructure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Transparent => "transparent",
            Self::LinearFixed => "linear fixed",
            Self::Cyclic => "cyclic",
        })
    }
}

/// Invalidation state. A record without one was never observed invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Invalidated; readability when invalidated unknown (3G `6283`).
    Invalidated,
    /// Invalidated and not readable or updatable while invalidated.
    InvalidatedUnreadable,
    /// Invalidated but still readable or updatable while invalidated.
    InvalidatedReadable,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Invalidated => "invalidated",
            Self::InvalidatedUnreadable => {
                "invalidated; not readable or updatable when invalidated"
            }
            Self::InvalidatedReadable => "invalidated; readable or updatable when invalidated",
        })
    }
}

/// EF contents, shaped by the file structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// One entry per record, read in absolute mode.
    Records(Vec<Vec<u8>>),
    /// The concatenated body of a transparent EF.
    Transparent(Vec<u8>),
}

/// Everything known about one file on the card.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: FilePath,
    pub file_type: Option<FileType>,
    pub structure: Option<FileStructure>,
    /// Body size in bytes (EF only).
    pub size: Option<u32>,
    pub record_size: Option<u16>,
    pub record_count: Option<u16>,
    pub status: Option<FileStatus>,
    /// Short File Identifier (3G only).
    pub sfi: Option<u8>,
    /// Legacy access condition bytes 8..11.
    pub access_2g: Option<[u8; 3]>,
    pub content: Option<Content>,
    /// Raw GET RESPONSE bodies, kept for diagnostics.
    pub select_2g_raw: Option<Vec<u8>>,
    pub select_3g_raw: Option<Vec<u8>>,
}

impl FileRecord {
    pub fn new(path: FilePath) -> Self {
        Self {
            path,
            file_type: None,
            structure: None,
            size: None,
            record_size: None,
            record_count: None,
            status: None,
            sfi: None,
            access_2g: None,
            content: None,
            select_2g_raw: None,
            select_3g_raw: None,
        }
    }

    pub fn is_ef(&self) -> bool {
        self.file_type == Some(FileType::Ef)
    }
}
