//! XVD header decoding.
//!
//! The header area is the first [`HEADER_SIZE`] bytes of the file: a
//! 512-byte RSA signature followed by the header proper and zero padding up
//! to the first region.  Every field is decoded at its documented offset
//! (see [`offsets`]); all integers are little-endian.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::{Result, XvdError};

/// Header area size, signature included.  The first region starts here.
pub const HEADER_SIZE: usize = 0x3000;
pub const SIGNATURE_SIZE: usize = 0x200;
pub const MAGIC: &[u8; 8] = b"msft-xvd";
/// The only block size seen in the wild.
pub const XVD_BLOCK_SIZE: u32 = 0xAA000;
pub const SECTOR_SIZE_LEGACY: u64 = 0x200;
pub const SECTOR_SIZE_MODERN: u64 = 0x1000;

/// Byte offsets of header fields from the start of the file.
pub mod offsets {
    pub const SIGNATURE:             usize = 0x000;
    pub const MAGIC:                 usize = 0x200;
    pub const FLAGS:                 usize = 0x208;
    pub const FORMAT_VERSION:        usize = 0x20C;
    pub const CREATION_TIME:         usize = 0x210;
    pub const DRIVE_SIZE:            usize = 0x218;
    pub const CONTENT_ID:            usize = 0x220;
    pub const USER_ID:               usize = 0x230;
    pub const ROOT_HASH:             usize = 0x240;
    pub const XVC_HASH:              usize = 0x260;
    pub const CONTAINER_TYPE:        usize = 0x280;
    pub const CONTENT_TYPE:          usize = 0x284;
    pub const EMBEDDED_LENGTH:       usize = 0x288;
    pub const USER_DATA_LENGTH:      usize = 0x28C;
    pub const VM_CONFIG_LENGTH:      usize = 0x290;
    pub const DYNAMIC_HEADER_LENGTH: usize = 0x294;
    pub const BLOCK_SIZE:            usize = 0x298;
    pub const EXT_ENTRIES:           usize = 0x29C;
    pub const CAPABILITIES:          usize = 0x2FC;
    pub const PE_CATALOG_HASH:       usize = 0x30C;
    pub const EMBEDDED_PDUID:        usize = 0x32C;
    pub const KEY_MATERIAL:          usize = 0x34C;
    pub const USER_DATA_HASH:        usize = 0x36C;
    pub const SANDBOX_ID:            usize = 0x38C;
    pub const PRODUCT_ID:            usize = 0x39C;
    pub const PDUID:                 usize = 0x3AC;
    pub const PACKAGE_VERSION:       usize = 0x3BC;
    pub const WRITEABLE_EXPIRATION:  usize = 0x464;
    pub const WRITEABLE_POLICY:      usize = 0x468;
    pub const PLS_SIZE:              usize = 0x46C;
    pub const MUTABLE_PAGE_COUNT:    usize = 0x470;
    pub const PLATFORMS:             usize = 0x471;
    pub const MAX_PLS_SIZE:          usize = 0x472;
    pub const SERVER_CONSOLE_MODE:   usize = 0x476;
    pub const REMOTE_BLOB_SIZE:      usize = 0x484;
    pub const SEQUENCE_NUMBER:       usize = 0x48C;
    pub const MIN_SYSTEM_VERSION:    usize = 0x494;
    pub const ODK_ID:                usize = 0x49C;
    pub const TRIM_PHASE:            usize = 0xC88;
    pub const TRIM_TIMESTAMP:        usize = 0xC90;
    pub const TRIM_BLOB_SIZE:        usize = 0xC98;
}

const EXT_ENTRY_SIZE: usize = 24;
const EXT_ENTRY_COUNT: usize = 4;
const CAPABILITY_COUNT: usize = 8;

// ── Flags ─────────────────────────────────────────────────────────────────────

/// Header flag word.  Bit 0 is the least significant bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XvdFlags(pub u32);

pub const FLAG_READ_ONLY:               u32 = 1 << 0;
pub const FLAG_ENCRYPTION_DISABLED:     u32 = 1 << 1;
pub const FLAG_DATA_INTEGRITY_DISABLED: u32 = 1 << 2;
pub const FLAG_LEGACY_SECTOR_SIZE:      u32 = 1 << 3;
pub const FLAG_RESILIENCY_ENABLED:      u32 = 1 << 4;
pub const FLAG_SRA_READ_ONLY:           u32 = 1 << 5;
pub const FLAG_REGION_ID_IN_XTS:        u32 = 1 << 6;
pub const FLAG_TITLE_SPECIFIC:          u32 = 1 << 7;
pub const FLAG_POINTER_XVD:             u32 = 1 << 8;
pub const FLAG_STREAMING_ROAMABLE:      u32 = 1 << 9;
pub const FLAG_DIFFUSIVE_DISABLED:      u32 = 1 << 10;
pub const FLAG_SPOOFED_DUID:            u32 = 1 << 11;
/// Formerly TrimSupported.  Never reused.
pub const FLAG_RESERVED0:               u32 = 1 << 12;
pub const FLAG_TRIM_SUPPORTED:          u32 = 1 << 13;
pub const FLAG_ROAMING_ENABLED:         u32 = 1 << 14;
pub const FLAG_RESERVED_MASK:           u32 = !((1 << 15) - 1);

const NAMED_FLAGS: [(&str, u32); 15] = [
    ("ReadOnly",              FLAG_READ_ONLY),
    ("EncryptionDisabled",    FLAG_ENCRYPTION_DISABLED),
    ("DataIntegrityDisabled", FLAG_DATA_INTEGRITY_DISABLED),
    ("LegacySectorSize",      FLAG_LEGACY_SECTOR_SIZE),
    ("ResiliencyEnabled",     FLAG_RESILIENCY_ENABLED),
    ("SraReadOnly",           FLAG_SRA_READ_ONLY),
    ("RegionIdInXts",         FLAG_REGION_ID_IN_XTS),
    ("TitleSpecific",         FLAG_TITLE_SPECIFIC),
    ("PointerXvd",            FLAG_POINTER_XVD),
    ("StreamingRoamable",     FLAG_STREAMING_ROAMABLE),
    ("DiffusiveDisabled",     FLAG_DIFFUSIVE_DISABLED),
    ("SpoofedDuid",           FLAG_SPOOFED_DUID),
    ("Reserved0",             FLAG_RESERVED0),
    ("TrimSupported",         FLAG_TRIM_SUPPORTED),
    ("RoamingEnabled",        FLAG_ROAMING_ENABLED),
];

impl XvdFlags {
    #[inline]
    fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn read_only(self)               -> bool { self.has(FLAG_READ_ONLY) }
    pub fn encryption_disabled(self)     -> bool { self.has(FLAG_ENCRYPTION_DISABLED) }
    pub fn data_integrity_disabled(self) -> bool { self.has(FLAG_DATA_INTEGRITY_DISABLED) }
    pub fn legacy_sector_size(self)      -> bool { self.has(FLAG_LEGACY_SECTOR_SIZE) }
    pub fn resiliency_enabled(self)      -> bool { self.has(FLAG_RESILIENCY_ENABLED) }
    pub fn sra_read_only(self)           -> bool { self.has(FLAG_SRA_READ_ONLY) }
    pub fn region_id_in_xts(self)        -> bool { self.has(FLAG_REGION_ID_IN_XTS) }
    pub fn title_specific(self)          -> bool { self.has(FLAG_TITLE_SPECIFIC) }
    pub fn pointer_xvd(self)             -> bool { self.has(FLAG_POINTER_XVD) }
    pub fn streaming_roamable(self)      -> bool { self.has(FLAG_STREAMING_ROAMABLE) }
    pub fn diffusive_disabled(self)      -> bool { self.has(FLAG_DIFFUSIVE_DISABLED) }
    pub fn spoofed_duid(self)            -> bool { self.has(FLAG_SPOOFED_DUID) }
    pub fn reserved0(self)               -> bool { self.has(FLAG_RESERVED0) }
    pub fn trim_supported(self)          -> bool { self.has(FLAG_TRIM_SUPPORTED) }
    pub fn roaming_enabled(self)         -> bool { self.has(FLAG_ROAMING_ENABLED) }

    /// Bits 15..=31, which have no known meaning.
    pub fn reserved_bits(self) -> u32 {
        (self.0 & FLAG_RESERVED_MASK) >> 15
    }

    /// Every named flag with its state, in bit order.
    pub fn named(self) -> impl Iterator<Item = (&'static str, bool)> {
        NAMED_FLAGS.iter().map(move |&(name, bit)| (name, self.has(bit)))
    }
}

// ── Enumerations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerType {
    Fixed,
    Dynamic,
}

impl ContainerType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ContainerType::Fixed),
            1 => Some(ContainerType::Dynamic),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ContainerType::Fixed   => "Fixed",
            ContainerType::Dynamic => "Dynamic",
        }
    }
}

const CONTENT_TYPE_NAMES: [&str; 40] = [
    "Data", "Title", "SystemOS", "EraOS", "Scratch", "ResetData", "App", "HostOS",
    "X360STFS", "X360FATX", "X360GDFX", "Updater", "OfflineUpdater", "Template",
    "MteHost", "MteApp", "MteTitle", "MteEraOS", "EraTools", "SystemTools",
    "SystemAuxiliary", "AcousticModel", "Codec", "Qaslt", "AppDlc", "TitleDlc",
    "UniversalDlc", "SystemData", "Test", "HwTest", "KioskData", "DevPackage",
    "HostProfiler", "Roamable", "ThinProvisioned", "StreamingOnlySra",
    "StreamingOnlyEra", "StreamingOnlyHost", "QuickResume", "HostData",
];

/// Raw content-type discriminant.  Values outside the known table are kept
/// as-is and named `"UNKNOWN"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentType(pub u32);

impl ContentType {
    pub fn name(self) -> &'static str {
        CONTENT_TYPE_NAMES
            .get(self.0 as usize)
            .copied()
            .unwrap_or("UNKNOWN")
    }

    pub fn is_known(self) -> bool {
        (self.0 as usize) < CONTENT_TYPE_NAMES.len()
    }
}

/// Platforms the container was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformMask(pub u8);

impl PlatformMask {
    pub fn pc(self)   -> bool { self.0 & 0x1 != 0 }
    pub fn gen8(self) -> bool { self.0 & 0x2 != 0 }
    pub fn gen9(self) -> bool { self.0 & 0x4 != 0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimPhase {
    None,
    Shuffle,
    Bat,
    Unknown(u32),
}

impl From<u32> for TrimPhase {
    fn from(raw: u32) -> Self {
        match raw {
            0 => TrimPhase::None,
            1 => TrimPhase::Shuffle,
            2 => TrimPhase::Bat,
            n => TrimPhase::Unknown(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimState {
    pub phase:     TrimPhase,
    pub timestamp: i64,
    pub blob_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtEntry {
    pub code:        u32,
    pub length:      u32,
    pub offset:      u64,
    pub data_length: u32,
    pub reserved:    u32,
}

// ── Header ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ContainerHeader {
    pub signature:             [u8; SIGNATURE_SIZE],
    pub magic:                 [u8; 8],
    pub flags:                 XvdFlags,
    pub format_version:        u32,
    /// Windows FILETIME.
    pub creation_time:         u64,
    /// Nominal drive size.  For dynamic containers this is the maximum.
    pub drive_size:            u64,
    pub content_id:            [u8; 16],
    pub user_id:               [u8; 16],
    pub root_hash:             [u8; 32],
    pub xvc_hash:              [u8; 32],
    /// Raw container type; see [`ContainerHeader::container_type`].
    pub container_type_raw:    u32,
    pub content_type:          ContentType,
    pub embedded_length:       u32,
    pub user_data_length:      u32,
    pub vm_config_length:      u32,
    pub dynamic_header_length: u32,
    pub block_size:            u32,
    pub ext_entries:           [ExtEntry; EXT_ENTRY_COUNT],
    pub capabilities:          [u16; CAPABILITY_COUNT],
    pub pe_catalog_hash:       [u8; 32],
    pub embedded_pduid:        [u8; 16],
    /// Sealed content key; never decrypted here.
    pub key_material:          [u8; 32],
    pub user_data_hash:        [u8; 32],
    pub sandbox_id:            [u8; 16],
    pub product_id:            [u8; 16],
    pub pduid:                 [u8; 16],
    pub package_version:       u64,
    pub writeable_expiration:  u32,
    pub writeable_policy:      u32,
    pub pls_size:              u32,
    pub mutable_page_count:    u8,
    pub platforms:             PlatformMask,
    pub max_pls_size:          u32,
    pub server_console_mode:   u8,
    pub remote_blob_size:      u64,
    pub sequence_number:       i64,
    pub min_system_version:    u64,
    pub odk_id:                u32,
    pub trim_state:            TrimState,
}

fn array<const N: usize>(raw: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[at..at + N]);
    out
}

impl ContainerHeader {
    /// Decode a header from the first [`HEADER_SIZE`] bytes of `raw`.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(XvdError::TruncatedHeader { available: raw.len(), required: HEADER_SIZE });
        }
        let raw = &raw[..HEADER_SIZE];
        use offsets as o;

        let u32_at = |at: usize| LittleEndian::read_u32(&raw[at..at + 4]);
        let u64_at = |at: usize| LittleEndian::read_u64(&raw[at..at + 8]);

        let mut ext_entries = [ExtEntry::default(); EXT_ENTRY_COUNT];
        for (i, entry) in ext_entries.iter_mut().enumerate() {
            let base = o::EXT_ENTRIES + i * EXT_ENTRY_SIZE;
            *entry = ExtEntry {
                code:        u32_at(base),
                length:      u32_at(base + 4),
                offset:      u64_at(base + 8),
                data_length: u32_at(base + 16),
                reserved:    u32_at(base + 20),
            };
        }

        let mut capabilities = [0u16; CAPABILITY_COUNT];
        LittleEndian::read_u16_into(
            &raw[o::CAPABILITIES..o::CAPABILITIES + 2 * CAPABILITY_COUNT],
            &mut capabilities,
        );

        Ok(Self {
            signature:             array(raw, o::SIGNATURE),
            magic:                 array(raw, o::MAGIC),
            flags:                 XvdFlags(u32_at(o::FLAGS)),
            format_version:        u32_at(o::FORMAT_VERSION),
            creation_time:         u64_at(o::CREATION_TIME),
            drive_size:            u64_at(o::DRIVE_SIZE),
            content_id:            array(raw, o::CONTENT_ID),
            user_id:               array(raw, o::USER_ID),
            root_hash:             array(raw, o::ROOT_HASH),
            xvc_hash:              array(raw, o::XVC_HASH),
            container_type_raw:    u32_at(o::CONTAINER_TYPE),
            content_type:          ContentType(u32_at(o::CONTENT_TYPE)),
            embedded_length:       u32_at(o::EMBEDDED_LENGTH),
            user_data_length:      u32_at(o::USER_DATA_LENGTH),
            vm_config_length:      u32_at(o::VM_CONFIG_LENGTH),
            dynamic_header_length: u32_at(o::DYNAMIC_HEADER_LENGTH),
            block_size:            u32_at(o::BLOCK_SIZE),
            ext_entries,
            capabilities,
            pe_catalog_hash:       array(raw, o::PE_CATALOG_HASH),
            embedded_pduid:        array(raw, o::EMBEDDED_PDUID),
            key_material:          array(raw, o::KEY_MATERIAL),
            user_data_hash:        array(raw, o::USER_DATA_HASH),
            sandbox_id:            array(raw, o::SANDBOX_ID),
            product_id:            array(raw, o::PRODUCT_ID),
            pduid:                 array(raw, o::PDUID),
            package_version:       u64_at(o::PACKAGE_VERSION),
            writeable_expiration:  u32_at(o::WRITEABLE_EXPIRATION),
            writeable_policy:      u32_at(o::WRITEABLE_POLICY),
            pls_size:              u32_at(o::PLS_SIZE),
            mutable_page_count:    raw[o::MUTABLE_PAGE_COUNT],
            platforms:             PlatformMask(raw[o::PLATFORMS]),
            max_pls_size:          u32_at(o::MAX_PLS_SIZE),
            server_console_mode:   raw[o::SERVER_CONSOLE_MODE],
            remote_blob_size:      u64_at(o::REMOTE_BLOB_SIZE),
            sequence_number:       LittleEndian::read_i64(&raw[o::SEQUENCE_NUMBER..]),
            min_system_version:    u64_at(o::MIN_SYSTEM_VERSION),
            odk_id:                u32_at(o::ODK_ID),
            trim_state: TrimState {
                phase:     TrimPhase::from(u32_at(o::TRIM_PHASE)),
                timestamp: LittleEndian::read_i64(&raw[o::TRIM_TIMESTAMP..]),
                blob_size: u64_at(o::TRIM_BLOB_SIZE),
            },
        })
    }

    /// Read and decode the header area from the current position of `reader`.
    pub fn read<R: Read>(reader: R) -> Result<Self> {
        let mut raw = Vec::with_capacity(HEADER_SIZE);
        reader.take(HEADER_SIZE as u64).read_to_end(&mut raw)?;
        Self::decode(&raw)
    }

    pub fn has_valid_magic(&self) -> bool {
        &self.magic == MAGIC
    }

    pub fn container_type(&self) -> Result<ContainerType> {
        ContainerType::from_raw(self.container_type_raw)
            .ok_or(XvdError::InvalidContainerType(self.container_type_raw))
    }

    /// Sector size used by the drive's partition table.
    pub fn sector_size(&self) -> u64 {
        if self.flags.legacy_sector_size() {
            SECTOR_SIZE_LEGACY
        } else {
            SECTOR_SIZE_MODERN
        }
    }

    /// A header whose signature area is all zeroes was never signed.
    pub fn is_signed(&self) -> bool {
        self.signature.iter().any(|&b| b != 0)
    }

    /// Sandbox id as text, up to the first NUL.
    pub fn sandbox(&self) -> String {
        let end = self.sandbox_id.iter().position(|&b| b == 0).unwrap_or(self.sandbox_id.len());
        String::from_utf8_lossy(&self.sandbox_id[..end]).into_owned()
    }
}
