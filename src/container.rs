//! High-level [`XvdFile`] API: open a container from a path, validate it and
//! pull regions out of it.
//!
//! ```no_run
//! use xvdscope::container::{OpenOptions, XvdFile};
//! use xvdscope::layout::RegionKind;
//!
//! let mut xvd = XvdFile::open("game.xvd")?;
//! for region in &xvd.layout()?.regions {
//!     println!("{:<20} {:#014x} {:#014x}", region.kind, region.offset, region.length);
//! }
//! xvd.extract_region(RegionKind::UserData, "userdata.bin")?;
//!
//! // Damaged files can still be inspected region by region.
//! let damaged = XvdFile::open_with("broken.xvd", OpenOptions { permissive: true })?;
//! assert!(damaged.validation_error().is_some());
//! # Ok::<(), xvdscope::error::XvdError>(())
//! ```

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, XvdError};
use crate::header::{ContainerHeader, HEADER_SIZE};
use crate::info::InfoReport;
use crate::layout::{LayoutResolver, RegionDescriptor, RegionKind, RegionLayout};
use crate::validate;

// ── OpenOptions ───────────────────────────────────────────────────────────────

/// Configuration for [`XvdFile::open_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// Keep the file open when validation fails.  Region queries then work on
    /// a header that is known to be inconsistent; use at your own risk.
    pub permissive: bool,
}

// ── XvdFile ───────────────────────────────────────────────────────────────────

pub struct XvdFile {
    path:       PathBuf,
    file:       File,
    file_size:  u64,
    header:     ContainerHeader,
    validation: Option<XvdError>,
}

impl XvdFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, OpenOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, opts: OpenOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let open_err = |source| XvdError::Open { path: path.clone(), source };

        let mut file  = File::open(&path).map_err(open_err)?;
        let file_size = file.metadata().map_err(open_err)?.len();
        debug!(path = %path.display(), file_size, "opened container");

        if file_size <= HEADER_SIZE as u64 {
            return Err(XvdError::FileTooSmall { size: file_size, minimum: HEADER_SIZE as u64 });
        }

        file.seek(SeekFrom::Start(0)).map_err(|source| XvdError::File { path: path.clone(), source })?;
        let header = ContainerHeader::read(&mut file).map_err(|e| e.with_path(&path))?;

        let mut xvd = Self { path, file, file_size, header, validation: None };
        for anomaly in LayoutResolver::new(&xvd.header).anomalies() {
            warn!(path = %xvd.path.display(), %anomaly, "format anomaly");
        }

        match xvd.validate() {
            Ok(()) => debug!(path = %xvd.path.display(), "header validated"),
            Err(e) if opts.permissive => {
                warn!(path = %xvd.path.display(), error = %e, "validation failed, continuing in permissive mode");
                xvd.validation = Some(e);
            }
            Err(e) => return Err(e),
        }
        Ok(xvd)
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.path }

    pub fn file_size(&self) -> u64 { self.file_size }

    pub fn header(&self) -> &ContainerHeader { &self.header }

    /// The validation failure kept in permissive mode, if any.
    pub fn validation_error(&self) -> Option<&XvdError> {
        self.validation.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.validation.is_none()
    }

    /// Re-run every validation check against the file.
    pub fn validate(&mut self) -> Result<()> {
        validate::validate(&self.header, self.file_size, &mut self.file)
            .map_err(|e| e.with_path(&self.path))
    }

    pub fn info(&self) -> InfoReport {
        InfoReport::from_header(&self.header)
    }

    // ── Layout ───────────────────────────────────────────────────────────────

    pub fn resolver(&self) -> LayoutResolver<'_> {
        LayoutResolver::new(&self.header)
    }

    pub fn region_of(&mut self, kind: RegionKind) -> Result<RegionDescriptor> {
        LayoutResolver::new(&self.header)
            .region_of(kind, &mut self.file)
            .map_err(|e| e.with_path(&self.path))
    }

    pub fn layout(&mut self) -> Result<RegionLayout> {
        let layout = LayoutResolver::new(&self.header)
            .resolve(&mut self.file)
            .map_err(|e| e.with_path(&self.path))?;
        debug!(
            container_type = ?layout.container_type,
            expected_file_size = layout.expected_file_size,
            "resolved layout"
        );
        Ok(layout)
    }

    // ── Region reads ─────────────────────────────────────────────────────────

    pub fn read_region(&mut self, kind: RegionKind) -> Result<Vec<u8>> {
        LayoutResolver::new(&self.header)
            .read_region(kind, &mut self.file)
            .map_err(|e| e.with_path(&self.path))
    }

    /// Write a region verbatim to `dest`, returning the number of bytes
    /// written.  `dest` is only created once the region is known to exist.
    pub fn extract_region<P: AsRef<Path>>(&mut self, kind: RegionKind, dest: P) -> Result<u64> {
        let dest     = dest.as_ref();
        let resolver = LayoutResolver::new(&self.header);
        let region   = resolver.region_of(kind, &mut self.file).map_err(|e| e.with_path(&self.path))?;
        if region.is_absent() {
            return Err(XvdError::RegionAbsent(kind));
        }

        info!(region = %kind, offset = region.offset, length = region.length, dest = %dest.display(), "extracting");
        let out = File::create(dest).map_err(|source| XvdError::Open { path: dest.to_owned(), source })?;
        let mut out = BufWriter::new(out);
        let copied = resolver
            .copy_region(kind, &mut self.file, &mut out)
            .map_err(|e| e.with_path(&self.path))?;
        out.flush().map_err(|source| XvdError::File { path: dest.to_owned(), source })?;
        Ok(copied)
    }
}
