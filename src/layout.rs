//! Region layout resolver.
//!
//! An XVD is a header followed by a fixed sequence of regions, each starting
//! where the previous one ends.  Any region may be empty.
//!
//! ```text
//!   fixed                      dynamic
//!   ─────────────────────      ─────────────────────
//!   header (0x3000)            header (0x3000)
//!   embedded container         embedded container
//!   mutable metadata           mutable metadata
//!   hash tree                  hash tree
//!   user data                  user data
//!   vm config (XVC)            vm config (XVC)
//!                              dynamic header (BAT)
//!   drive                      drive (allocated blocks only)
//! ```
//!
//! Every size is derived from the header alone, except the drive of a dynamic
//! container: its header size is the maximum the drive may grow to, so the
//! real size is estimated from the number of allocated BAT entries.
//!
//! The resolver keeps no state.  Each query recomputes its predecessors, so
//! two calls against the same header and file always agree.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::str::FromStr;

use serde::Serialize;

use crate::bat::{self, BatSummary, ENTRY_SIZE};
use crate::error::{Result, XvdError};
use crate::hash_tree::{tree_shape, HashTreeShape};
use crate::header::{ContainerHeader, ContainerType, HEADER_SIZE};
use crate::math::{
    align_to_page, blocks_to_bytes, bytes_to_pages, checked_sum, is_page_aligned,
    pages_to_bytes, BLOCK_SIZE,
};

/// Extra block added to the allocated BAT entry count when estimating dynamic
/// occupancy.  Real files only match their size with it; why is unknown.
pub const OCCUPANCY_EXTRA_BLOCKS: u64 = 1;

// ── RegionKind ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegionKind {
    EmbeddedContainer,
    MutableMetadata,
    HashTree,
    UserData,
    VmConfig,
    DynamicHeader,
    Drive,
}

impl RegionKind {
    /// File order.
    pub const ALL: [RegionKind; 7] = [
        RegionKind::EmbeddedContainer,
        RegionKind::MutableMetadata,
        RegionKind::HashTree,
        RegionKind::UserData,
        RegionKind::VmConfig,
        RegionKind::DynamicHeader,
        RegionKind::Drive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RegionKind::EmbeddedContainer => "embedded-container",
            RegionKind::MutableMetadata   => "mutable-metadata",
            RegionKind::HashTree          => "hash-tree",
            RegionKind::UserData          => "user-data",
            RegionKind::VmConfig          => "vm-config",
            RegionKind::DynamicHeader     => "dynamic-header",
            RegionKind::Drive             => "drive",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RegionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "embedded-container" | "embedded" | "exvd"   => RegionKind::EmbeddedContainer,
            "mutable-metadata" | "mutable" | "mdu"       => RegionKind::MutableMetadata,
            "hash-tree" | "hashtree" | "htree"           => RegionKind::HashTree,
            "user-data" | "userdata" | "udat"            => RegionKind::UserData,
            "vm-config" | "vmconfig" | "xvc"             => RegionKind::VmConfig,
            "dynamic-header" | "dynheader" | "bat"       => RegionKind::DynamicHeader,
            "drive"                                      => RegionKind::Drive,
            other => return Err(format!("unknown region '{other}'")),
        })
    }
}

// ── RegionDescriptor ──────────────────────────────────────────────────────────

/// Byte range of one region in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionDescriptor {
    pub kind:   RegionKind,
    pub offset: u64,
    pub length: u64,
}

impl RegionDescriptor {
    pub fn end(&self) -> Result<u64> {
        self.offset
            .checked_add(self.length)
            .ok_or(XvdError::SizeOverflow("region end"))
    }

    pub fn is_absent(&self) -> bool {
        self.length == 0
    }
}

// ── Anomalies ─────────────────────────────────────────────────────────────────

/// Something unusual about the header that does not stop layout resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutAnomaly {
    /// Embedded container length is not page-aligned; the aligned value is used.
    EmbeddedLengthUnaligned { raw: u32 },
    /// VM-config length is not page-aligned; the aligned value is used.
    VmConfigLengthUnaligned { raw: u32 },
    /// Drive size is not page-aligned; the raw value is used for fixed drives.
    DriveSizeUnaligned { raw: u64 },
    /// The hash tree is stored twice.  No such file has been confirmed.
    ResilientHashTree,
    /// Format version 2 is accepted but rarely seen.
    RareFormatVersion { version: u32 },
}

impl fmt::Display for LayoutAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutAnomaly::EmbeddedLengthUnaligned { raw } =>
                write!(f, "embedded container length {raw:#x} is not page-aligned"),
            LayoutAnomaly::VmConfigLengthUnaligned { raw } =>
                write!(f, "vm-config length {raw:#x} is not page-aligned"),
            LayoutAnomaly::DriveSizeUnaligned { raw } =>
                write!(f, "drive size {raw:#x} is not page-aligned"),
            LayoutAnomaly::ResilientHashTree =>
                f.write_str("resilient hash tree (duplicated levels)"),
            LayoutAnomaly::RareFormatVersion { version } =>
                write!(f, "rare format version {version}"),
        }
    }
}

// ── RegionLayout ──────────────────────────────────────────────────────────────

/// Every region of a container, resolved in one pass.
#[derive(Debug, Clone, Serialize)]
pub struct RegionLayout {
    pub container_type:     ContainerType,
    /// In file order; always one entry per [`RegionKind`].
    pub regions:            Vec<RegionDescriptor>,
    pub expected_file_size: u64,
    /// BAT scan result; `None` for fixed containers.
    pub bat:                Option<BatSummary>,
    pub anomalies:          Vec<LayoutAnomaly>,
}

impl RegionLayout {
    pub fn get(&self, kind: RegionKind) -> Option<&RegionDescriptor> {
        self.regions.iter().find(|r| r.kind == kind)
    }
}

fn occupancy(summary: &BatSummary) -> Result<u64> {
    blocks_to_bytes(summary.allocated + OCCUPANCY_EXTRA_BLOCKS)
}

// ── LayoutResolver ────────────────────────────────────────────────────────────

/// Derives region positions from a decoded header.
#[derive(Debug, Clone, Copy)]
pub struct LayoutResolver<'h> {
    header: &'h ContainerHeader,
}

impl<'h> LayoutResolver<'h> {
    pub fn new(header: &'h ContainerHeader) -> Self {
        Self { header }
    }

    pub fn header(&self) -> &'h ContainerHeader {
        self.header
    }

    fn after(prev: &RegionDescriptor, kind: RegionKind, length: u64) -> Result<RegionDescriptor> {
        Ok(RegionDescriptor { kind, offset: prev.end()?, length })
    }

    // ── Regions derived from the header alone ────────────────────────────────

    pub fn embedded_container_region(&self) -> Result<RegionDescriptor> {
        Ok(RegionDescriptor {
            kind:   RegionKind::EmbeddedContainer,
            offset: HEADER_SIZE as u64,
            length: align_to_page(u64::from(self.header.embedded_length))?,
        })
    }

    pub fn mutable_metadata_region(&self) -> Result<RegionDescriptor> {
        let length = pages_to_bytes(u64::from(self.header.mutable_page_count))?;
        Self::after(&self.embedded_container_region()?, RegionKind::MutableMetadata, length)
    }

    pub fn hash_tree_region(&self) -> Result<RegionDescriptor> {
        let length = match self.hash_tree_shape()? {
            Some(shape) => shape.size_bytes()?,
            None        => 0,
        };
        Self::after(&self.mutable_metadata_region()?, RegionKind::HashTree, length)
    }

    pub fn user_data_region(&self) -> Result<RegionDescriptor> {
        let length = align_to_page(u64::from(self.header.user_data_length))?;
        Self::after(&self.hash_tree_region()?, RegionKind::UserData, length)
    }

    pub fn vm_config_region(&self) -> Result<RegionDescriptor> {
        let length = align_to_page(u64::from(self.header.vm_config_length))?;
        Self::after(&self.user_data_region()?, RegionKind::VmConfig, length)
    }

    /// The BAT.  Not page-padded.  Fixed containers have no BAT, so the slot
    /// is empty.
    pub fn dynamic_header_region(&self) -> Result<RegionDescriptor> {
        let length = self.dynamic_header_length()?;
        Self::after(&self.vm_config_region()?, RegionKind::DynamicHeader, length)
    }

    fn dynamic_header_length(&self) -> Result<u64> {
        Ok(match self.header.container_type()? {
            ContainerType::Dynamic => u64::from(self.header.dynamic_header_length),
            ContainerType::Fixed   => 0,
        })
    }

    /// Drive length of a fixed container.  An unaligned size is used raw.
    fn fixed_drive_length(&self) -> u64 {
        self.header.drive_size
    }

    // ── Hash tree ─────────────────────────────────────────────────────────────

    /// Number of data pages covered by the hash tree.
    pub fn hashed_data_pages(&self) -> Result<u64> {
        match self.header.container_type()? {
            ContainerType::Fixed => {
                let data_bytes = checked_sum(
                    [
                        self.fixed_drive_length(),
                        align_to_page(u64::from(self.header.user_data_length))?,
                        align_to_page(u64::from(self.header.vm_config_length))?,
                        self.dynamic_header_length()?,
                    ],
                    "hashed data size",
                )?;
                Ok(bytes_to_pages(data_bytes))
            }
            ContainerType::Dynamic => {
                // The tree is sized for the maximum mapped space: one block
                // per BAT entry, not the blocks actually allocated.
                let entries = u64::from(self.header.dynamic_header_length) / ENTRY_SIZE;
                let mapped  = align_to_page(blocks_to_bytes(entries)?)?;
                Ok(bytes_to_pages(mapped))
            }
        }
    }

    /// Shape of the hash tree, or `None` when data integrity is disabled.
    pub fn hash_tree_shape(&self) -> Result<Option<HashTreeShape>> {
        if self.header.flags.data_integrity_disabled() {
            return Ok(None);
        }
        let pages = self.hashed_data_pages()?;
        tree_shape(pages, self.header.flags.resiliency_enabled()).map(Some)
    }

    // ── Drive ─────────────────────────────────────────────────────────────────

    pub fn drive_region<R: Read + Seek>(&self, reader: &mut R) -> Result<RegionDescriptor> {
        let bat = self.bat_summary(reader)?;
        self.drive_from(bat.as_ref())
    }

    fn drive_from(&self, bat: Option<&BatSummary>) -> Result<RegionDescriptor> {
        match bat {
            None          => Self::after(&self.vm_config_region()?, RegionKind::Drive, self.fixed_drive_length()),
            Some(summary) => {
                let length = self.used_drive_size(summary)?;
                Self::after(&self.dynamic_header_region()?, RegionKind::Drive, length)
            }
        }
    }

    /// Scan the BAT of a dynamic container.  Fixed containers have none.
    pub fn bat_summary<R: Read + Seek>(&self, reader: &mut R) -> Result<Option<BatSummary>> {
        match self.header.container_type()? {
            ContainerType::Fixed   => Ok(None),
            ContainerType::Dynamic => self.scan_bat(reader).map(Some),
        }
    }

    fn scan_bat<R: Read + Seek>(&self, reader: &mut R) -> Result<BatSummary> {
        let h = self.header;
        // Located with the raw (unaligned) user data and vm-config lengths.
        let bat_offset = checked_sum(
            [
                self.hash_tree_region()?.end()?,
                u64::from(h.user_data_length),
                u64::from(h.vm_config_length),
            ],
            "BAT offset",
        )?;
        bat::scan(reader, bat_offset, u64::from(h.dynamic_header_length))
    }

    /// Bytes the BAT says are in use across user data, vm config, BAT and
    /// drive together.
    pub fn dynamic_occupancy<R: Read + Seek>(&self, reader: &mut R) -> Result<u64> {
        occupancy(&self.scan_bat(reader)?)
    }

    /// Drive bytes actually present in a dynamic container.
    pub fn compute_used_drive_size<R: Read + Seek>(&self, reader: &mut R) -> Result<u64> {
        self.used_drive_size(&self.scan_bat(reader)?)
    }

    /// `used = drive − ((drive + user + vm + bat) − occupancy)`, which reduces
    /// to `occupancy − (user + vm + bat)`.  The BAT maps all four regions, so
    /// the non-drive regions are taken back out of the occupancy figure.
    fn used_drive_size(&self, summary: &BatSummary) -> Result<u64> {
        let h = self.header;
        let non_drive = checked_sum(
            [
                u64::from(h.user_data_length),
                u64::from(h.vm_config_length),
                u64::from(h.dynamic_header_length),
            ],
            "mapped metadata size",
        )?;
        // Total mapped space must itself be representable.
        checked_sum([h.drive_size, non_drive], "mapped space")?;
        occupancy(summary)?
            .checked_sub(non_drive)
            .ok_or(XvdError::SizeOverflow("used drive size"))
    }

    // ── Queries over every region ─────────────────────────────────────────────

    pub fn region_of<R: Read + Seek>(&self, kind: RegionKind, reader: &mut R) -> Result<RegionDescriptor> {
        match kind {
            RegionKind::EmbeddedContainer => self.embedded_container_region(),
            RegionKind::MutableMetadata   => self.mutable_metadata_region(),
            RegionKind::HashTree          => self.hash_tree_region(),
            RegionKind::UserData          => self.user_data_region(),
            RegionKind::VmConfig          => self.vm_config_region(),
            RegionKind::DynamicHeader     => self.dynamic_header_region(),
            RegionKind::Drive             => self.drive_region(reader),
        }
    }

    /// Header size plus every region, i.e. the end of the drive.
    pub fn expected_file_size<R: Read + Seek>(&self, reader: &mut R) -> Result<u64> {
        self.drive_region(reader)?.end()
    }

    /// Non-fatal observations about the header.
    pub fn anomalies(&self) -> Vec<LayoutAnomaly> {
        let h = self.header;
        let mut out = Vec::new();
        if h.format_version == 2 {
            out.push(LayoutAnomaly::RareFormatVersion { version: 2 });
        }
        if !is_page_aligned(u64::from(h.embedded_length)) {
            out.push(LayoutAnomaly::EmbeddedLengthUnaligned { raw: h.embedded_length });
        }
        if !is_page_aligned(u64::from(h.vm_config_length)) {
            out.push(LayoutAnomaly::VmConfigLengthUnaligned { raw: h.vm_config_length });
        }
        if !is_page_aligned(h.drive_size) {
            out.push(LayoutAnomaly::DriveSizeUnaligned { raw: h.drive_size });
        }
        if !h.flags.data_integrity_disabled() && h.flags.resiliency_enabled() {
            out.push(LayoutAnomaly::ResilientHashTree);
        }
        out
    }

    /// Resolve every region in order.  Reads the BAT at most once.
    pub fn resolve<R: Read + Seek>(&self, reader: &mut R) -> Result<RegionLayout> {
        let container_type = self.header.container_type()?;
        let bat = self.bat_summary(reader)?;

        let mut regions = vec![
            self.embedded_container_region()?,
            self.mutable_metadata_region()?,
            self.hash_tree_region()?,
            self.user_data_region()?,
            self.vm_config_region()?,
            self.dynamic_header_region()?,
        ];
        let drive = self.drive_from(bat.as_ref())?;
        regions.push(drive);

        Ok(RegionLayout {
            container_type,
            expected_file_size: drive.end()?,
            regions,
            bat,
            anomalies: self.anomalies(),
        })
    }

    // ── Region reads ──────────────────────────────────────────────────────────

    /// Read a whole region into memory.
    pub fn read_region<R: Read + Seek>(&self, kind: RegionKind, reader: &mut R) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.copy_region(kind, reader, &mut out)?;
        Ok(out)
    }

    /// Stream a region into `writer`, returning the number of bytes copied.
    pub fn copy_region<R, W>(&self, kind: RegionKind, reader: &mut R, writer: &mut W) -> Result<u64>
    where
        R: Read + Seek,
        W: Write,
    {
        let region = self.region_of(kind, reader)?;
        if region.is_absent() {
            return Err(XvdError::RegionAbsent(kind));
        }
        reader.seek(SeekFrom::Start(region.offset))?;
        let copied = io::copy(&mut reader.by_ref().take(region.length), writer)?;
        if copied != region.length {
            return Err(XvdError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{kind} ends {:#x} bytes past end of file", region.length - copied),
            )));
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bat::UNALLOCATED;
    use crate::header::{offsets, FLAG_DATA_INTEGRITY_DISABLED, FLAG_RESILIENCY_ENABLED, MAGIC, XVD_BLOCK_SIZE};
    use crate::math::PAGE_SIZE;
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Cursor;

    struct Fields {
        flags:     u32,
        dynamic:   bool,
        drive:     u64,
        embedded:  u32,
        user_data: u32,
        vm_config: u32,
        bat_len:   u32,
        mutable:   u8,
    }

    impl Default for Fields {
        fn default() -> Self {
            Self {
                flags: FLAG_DATA_INTEGRITY_DISABLED,
                dynamic: false,
                drive: 0x10000,
                embedded: 0,
                user_data: 0,
                vm_config: 0,
                bat_len: 0,
                mutable: 0,
            }
        }
    }

    fn header(f: Fields) -> ContainerHeader {
        let mut raw = vec![0u8; HEADER_SIZE];
        raw[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(MAGIC);
        let mut put = |at: usize, v: u32| LittleEndian::write_u32(&mut raw[at..at + 4], v);
        put(offsets::FLAGS, f.flags);
        put(offsets::FORMAT_VERSION, 3);
        put(offsets::CONTAINER_TYPE, u32::from(f.dynamic));
        put(offsets::EMBEDDED_LENGTH, f.embedded);
        put(offsets::USER_DATA_LENGTH, f.user_data);
        put(offsets::VM_CONFIG_LENGTH, f.vm_config);
        put(offsets::DYNAMIC_HEADER_LENGTH, f.bat_len);
        put(offsets::BLOCK_SIZE, XVD_BLOCK_SIZE);
        LittleEndian::write_u64(&mut raw[offsets::DRIVE_SIZE..], f.drive);
        raw[offsets::MUTABLE_PAGE_COUNT] = f.mutable;
        ContainerHeader::decode(&raw).unwrap()
    }

    #[test]
    fn fixed_minimal_layout() {
        let h = header(Fields::default());
        let r = LayoutResolver::new(&h);
        let layout = r.resolve(&mut Cursor::new(Vec::new())).unwrap();
        assert_eq!(layout.expected_file_size, HEADER_SIZE as u64 + 0x10000);
        let drive = layout.get(RegionKind::Drive).unwrap();
        assert_eq!(drive.offset, HEADER_SIZE as u64);
        assert!(layout.regions[..6].iter().all(|r| r.is_absent()));
    }

    #[test]
    fn fixed_regions_chain() {
        let h = header(Fields {
            flags: 0,
            embedded: 0x1800,
            mutable: 2,
            user_data: 0x2000,
            vm_config: 0x1001,
            ..Default::default()
        });
        let r = LayoutResolver::new(&h);
        let layout = r.resolve(&mut Cursor::new(Vec::new())).unwrap();

        let lengths: Vec<u64> = layout.regions.iter().map(|r| r.length).collect();
        // drive 16 + user 2 + vm 2 pages = 20 data pages -> one tree page.
        assert_eq!(lengths, [0x2000, 0x2000, PAGE_SIZE, 0x2000, 0x2000, 0, 0x10000]);

        let mut offset = HEADER_SIZE as u64;
        for region in &layout.regions {
            assert_eq!(region.offset, offset, "{}", region.kind);
            offset += region.length;
        }
        assert_eq!(layout.expected_file_size, offset);
        assert_eq!(
            layout.anomalies,
            [
                LayoutAnomaly::EmbeddedLengthUnaligned { raw: 0x1800 },
                LayoutAnomaly::VmConfigLengthUnaligned { raw: 0x1001 },
            ]
        );
    }

    #[test]
    fn fixed_unaligned_drive_uses_raw_size() {
        let h = header(Fields { drive: 0x10001, ..Default::default() });
        let r = LayoutResolver::new(&h);
        let drive = r.drive_region(&mut Cursor::new(Vec::new())).unwrap();
        assert_eq!(drive.length, 0x10001);
        assert!(r.anomalies().contains(&LayoutAnomaly::DriveSizeUnaligned { raw: 0x10001 }));
    }

    #[test]
    fn resilient_fixed_tree() {
        let h = header(Fields { flags: FLAG_RESILIENCY_ENABLED, ..Default::default() });
        let r = LayoutResolver::new(&h);
        assert_eq!(r.hash_tree_region().unwrap().length, 2 * PAGE_SIZE);
        assert!(r.anomalies().contains(&LayoutAnomaly::ResilientHashTree));
    }

    /// Dynamic container whose BAT has `entries` slots, `allocated` of them in use.
    fn dynamic_file(entries: u32, allocated: u32, user_data: u32) -> (ContainerHeader, Cursor<Vec<u8>>) {
        let h = header(Fields {
            flags: 0,
            dynamic: true,
            drive: 0x40_0000_0000,
            user_data,
            bat_len: entries * 4,
            ..Default::default()
        });
        let r = LayoutResolver::new(&h);
        let bat_at = r.user_data_region().unwrap().end().unwrap() as usize;

        let mut file = vec![0u8; bat_at];
        for i in 0..entries {
            let e = if i < allocated { i } else { UNALLOCATED };
            file.extend_from_slice(&e.to_le_bytes());
        }
        (h, Cursor::new(file))
    }

    #[test]
    fn dynamic_tree_uses_bat_capacity() {
        let (h, _) = dynamic_file(10, 3, 0);
        let r = LayoutResolver::new(&h);
        // 10 blocks * 170 pages = 1700 pages -> 10 + 1 tree pages.
        assert_eq!(r.hashed_data_pages().unwrap(), 1700);
        assert_eq!(r.hash_tree_region().unwrap().length, 11 * PAGE_SIZE);
    }

    #[test]
    fn dynamic_occupancy_counts_plus_one_block() {
        let (h, mut file) = dynamic_file(10, 3, 0x2000);
        let r = LayoutResolver::new(&h);
        assert_eq!(r.dynamic_occupancy(&mut file).unwrap(), 4 * BLOCK_SIZE);
        assert_eq!(r.compute_used_drive_size(&mut file).unwrap(), 4 * BLOCK_SIZE - 0x2000 - 40);
    }

    #[test]
    fn dynamic_drive_follows_bat() {
        let (h, mut file) = dynamic_file(10, 3, 0x2000);
        let r = LayoutResolver::new(&h);
        let layout = r.resolve(&mut file).unwrap();
        let bat = layout.get(RegionKind::DynamicHeader).unwrap();
        let drive = layout.get(RegionKind::Drive).unwrap();
        assert_eq!(bat.length, 40);
        assert_eq!(drive.offset, bat.offset + 40);
        assert_eq!(layout.expected_file_size, drive.offset + drive.length);

        let summary = layout.bat.unwrap();
        assert_eq!(summary.allocated, 3);
        assert_eq!(summary.total_entries, 10);
        assert_eq!(summary.highest_entry, Some(2));
    }

    #[test]
    fn fixed_layout_has_no_bat_summary() {
        let h = header(Fields { bat_len: 0x40, ..Default::default() });
        let layout = LayoutResolver::new(&h).resolve(&mut Cursor::new(Vec::new())).unwrap();
        assert!(layout.bat.is_none());
    }

    #[test]
    fn partial_bat_entry_aborts_resolution() {
        let h = header(Fields { dynamic: true, drive: 0x40_0000_0000, bat_len: 6, ..Default::default() });
        let r = LayoutResolver::new(&h);
        let mut file = Cursor::new(vec![0u8; HEADER_SIZE + 0x100]);
        assert!(matches!(r.resolve(&mut file), Err(XvdError::MalformedTable { size: 6 })));
        assert!(matches!(r.drive_region(&mut file), Err(XvdError::MalformedTable { size: 6 })));
        // Regions before the drive do not need the table.
        assert_eq!(r.dynamic_header_region().unwrap().length, 6);
    }

    #[test]
    fn huge_fixed_drive_aborts_resolution() {
        let h = header(Fields { drive: u64::MAX, ..Default::default() });
        let r = LayoutResolver::new(&h);
        assert!(matches!(
            r.resolve(&mut Cursor::new(Vec::new())),
            Err(XvdError::SizeOverflow(_))
        ));

        // With integrity on, the tree cannot cover that many pages.
        let h = header(Fields { flags: 0, drive: u64::MAX, ..Default::default() });
        let r = LayoutResolver::new(&h);
        assert!(matches!(
            r.resolve(&mut Cursor::new(Vec::new())),
            Err(XvdError::HashTreeLevelOverflow { .. })
        ));
    }

    #[test]
    fn occupancy_below_metadata_is_overflow() {
        // Nothing allocated: 1 block of occupancy cannot cover 1 MiB of user data.
        let (h, mut file) = dynamic_file(4, 0, 0x10_0000);
        let r = LayoutResolver::new(&h);
        assert!(matches!(
            r.compute_used_drive_size(&mut file),
            Err(XvdError::SizeOverflow(_))
        ));
    }

    #[test]
    fn fixed_has_empty_dynamic_header_slot() {
        let h = header(Fields { bat_len: 0x40, ..Default::default() });
        let r = LayoutResolver::new(&h);
        let bat = r.dynamic_header_region().unwrap();
        assert!(bat.is_absent());
        assert_eq!(bat.offset, r.vm_config_region().unwrap().end().unwrap());
    }

    #[test]
    fn read_absent_region_fails() {
        let h = header(Fields::default());
        let r = LayoutResolver::new(&h);
        let err = r.read_region(RegionKind::UserData, &mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, XvdError::RegionAbsent(RegionKind::UserData)));
    }

    #[test]
    fn read_region_returns_exact_bytes() {
        let h = header(Fields { user_data: 0x1000, ..Default::default() });
        let mut file = vec![0u8; HEADER_SIZE];
        file.extend(std::iter::repeat(0xAB).take(0x1000));
        file.extend(std::iter::repeat(0xCD).take(0x10));
        let r = LayoutResolver::new(&h);
        let data = r.read_region(RegionKind::UserData, &mut Cursor::new(file)).unwrap();
        assert_eq!(data.len(), 0x1000);
        assert!(data.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn region_names_parse() {
        for kind in RegionKind::ALL {
            assert_eq!(kind.name().parse::<RegionKind>().unwrap(), kind);
        }
        assert_eq!("exvd".parse::<RegionKind>().unwrap(), RegionKind::EmbeddedContainer);
        assert_eq!("UDAT".parse::<RegionKind>().unwrap(), RegionKind::UserData);
        assert!("nope".parse::<RegionKind>().is_err());
    }
}
