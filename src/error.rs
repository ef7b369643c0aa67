//! Error taxonomy shared by every module of the crate.
//!
//! Errors fall into four groups:
//!
//! | Group | Variants |
//! |-------|----------|
//! | I/O | `Io`, `Open`, `File` |
//! | Format | `FileTooSmall`, `TruncatedHeader`, `InvalidMagic`, `UnsupportedVersion`, `InvalidContainerType`, `InvalidBlockSize`, `MalformedTable`, `HashTreeLevelOverflow` |
//! | Size cross-check | `SizeMismatchTruncated`, `SizeMismatchTrailingData` |
//! | Arithmetic | `SizeOverflow` |
//!
//! `RegionAbsent` is raised only by region reads on a zero-length region.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::layout::RegionKind;

#[derive(Error, Debug)]
pub enum XvdError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to open '{}': {source}", .path.display())]
    Open {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on '{}': {source}", .path.display())]
    File {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("file too small to be an XVD: {size} bytes (must exceed {minimum})")]
    FileTooSmall { size: u64, minimum: u64 },

    #[error("truncated header: got {available} bytes, need {required}")]
    TruncatedHeader { available: usize, required: usize },

    #[error("invalid magic, expected \"msft-xvd\", got {}", hex::encode(.0))]
    InvalidMagic([u8; 8]),

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid container type: {0}")]
    InvalidContainerType(u32),

    #[error("invalid block size: {0:#x}")]
    InvalidBlockSize(u32),

    #[error("malformed block allocation table: {size} bytes is not a multiple of the entry size")]
    MalformedTable { size: u64 },

    #[error("hash tree needs more than four levels for {data_pages} data pages")]
    HashTreeLevelOverflow { data_pages: u64 },

    #[error("file is truncated: layout expects {expected:#x} bytes, file has {actual:#x}")]
    SizeMismatchTruncated { expected: u64, actual: u64 },

    #[error("file has trailing data: layout expects {expected:#x} bytes, file has {actual:#x}")]
    SizeMismatchTrailingData { expected: u64, actual: u64 },

    #[error("size arithmetic overflow while computing {0}")]
    SizeOverflow(&'static str),

    #[error("region {0} is absent from this container")]
    RegionAbsent(RegionKind),
}

impl XvdError {
    /// True for errors caused by the file's contents rather than by I/O or
    /// the size cross-check.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            XvdError::FileTooSmall { .. }
                | XvdError::TruncatedHeader { .. }
                | XvdError::InvalidMagic(_)
                | XvdError::UnsupportedVersion(_)
                | XvdError::InvalidContainerType(_)
                | XvdError::InvalidBlockSize(_)
                | XvdError::MalformedTable { .. }
                | XvdError::HashTreeLevelOverflow { .. }
        )
    }

    /// Attach `path` to a bare I/O error.  Other variants pass through.
    pub fn with_path(self, path: &Path) -> Self {
        match self {
            XvdError::Io(source) => XvdError::File { path: path.to_owned(), source },
            other => other,
        }
    }

    pub fn is_size_mismatch(&self) -> bool {
        matches!(
            self,
            XvdError::SizeMismatchTruncated { .. } | XvdError::SizeMismatchTrailingData { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, XvdError>;
