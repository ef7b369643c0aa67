//! Human-readable rendering of header identity fields.

use chrono::DateTime;
use serde::Serialize;
use uuid::Uuid;

use crate::header::{ContainerHeader, ContainerType};

/// FILETIME epoch (1601-01-01) to Unix epoch, in seconds.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SECOND: u64 = 10_000_000;

/// Format a 16-byte Microsoft GUID (first three fields little-endian).
pub fn format_guid(bytes: &[u8; 16]) -> String {
    Uuid::from_bytes_le(*bytes).hyphenated().to_string().to_uppercase()
}

/// Format a packed four-part version number `major.minor.build.revision`.
///
/// The top bit is a flag; `extended` prints it as a leading fifth component.
pub fn format_version_number(version: u64, extended: bool) -> String {
    let parts = [
        (version >> 48) & 0x7FFF,
        (version >> 32) & 0xFFFF,
        (version >> 16) & 0xFFFF,
        version & 0xFFFF,
    ];
    let base = format!("{}.{}.{}.{}", parts[0], parts[1], parts[2], parts[3]);
    if extended {
        format!("{}.{base}", version >> 63)
    } else {
        base
    }
}

/// Format a Windows FILETIME as UTC.  Zero means "not set".
pub fn format_filetime(filetime: u64) -> Option<String> {
    if filetime == 0 {
        return None;
    }
    let secs  = (filetime / FILETIME_TICKS_PER_SECOND) as i64 - FILETIME_EPOCH_OFFSET;
    let nanos = (filetime % FILETIME_TICKS_PER_SECOND) as u32 * 100;
    DateTime::from_timestamp(secs, nanos).map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// Identity and flag summary of a header, for display or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct InfoReport {
    pub container_type:     String,
    pub content_type:       String,
    pub format_version:     u32,
    pub content_id:         String,
    pub user_id:            String,
    pub product_id:         String,
    pub pduid:              String,
    pub sandbox:            String,
    pub package_version:    String,
    pub min_system_version: String,
    pub creation_time:      Option<String>,
    pub odk_keyslot:        String,
    pub signed:             bool,
    pub drive_size:         u64,
    pub sector_size:        u64,
    pub platforms:          Vec<&'static str>,
    pub pls_size:           u32,
    pub flags:              Vec<&'static str>,
    pub reserved_flag_bits: u32,
    pub root_hash:          String,
}

impl InfoReport {
    pub fn from_header(h: &ContainerHeader) -> Self {
        let container_type = ContainerType::from_raw(h.container_type_raw)
            .map(|t| t.name().to_owned())
            .unwrap_or_else(|| format!("Invalid ({})", h.container_type_raw));

        let mut platforms = Vec::new();
        if h.platforms.pc()   { platforms.push("PC"); }
        if h.platforms.gen8() { platforms.push("Gen8"); }
        if h.platforms.gen9() { platforms.push("Gen9"); }

        Self {
            container_type,
            content_type:       h.content_type.name().to_owned(),
            format_version:     h.format_version,
            content_id:         format_guid(&h.content_id),
            user_id:            format_guid(&h.user_id),
            product_id:         format_guid(&h.product_id),
            pduid:              format_guid(&h.pduid),
            sandbox:            h.sandbox(),
            package_version:    format_version_number(h.package_version, false),
            min_system_version: format_version_number(h.min_system_version, false),
            creation_time:      format_filetime(h.creation_time),
            odk_keyslot: if h.odk_id == 0 {
                "0 (defined by content type)".to_owned()
            } else {
                h.odk_id.to_string()
            },
            signed:             h.is_signed(),
            drive_size:         h.drive_size,
            sector_size:        h.sector_size(),
            platforms,
            pls_size:           h.pls_size,
            flags:              h.flags.named().filter(|(_, on)| *on).map(|(name, _)| name).collect(),
            reserved_flag_bits: h.flags.reserved_bits(),
            root_hash:          hex::encode(h.root_hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_uses_mixed_endian_fields() {
        let bytes = [
            0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66,
            0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF,
        ];
        assert_eq!(format_guid(&bytes), "00112233-4455-6677-8899-AABBCCDDEEFF");
    }

    #[test]
    fn version_number_parts() {
        let v = (10u64 << 48) | (22000 << 16) | 1;
        assert_eq!(format_version_number(v, false), "10.0.22000.1");
        assert_eq!(format_version_number(v | (1 << 63), true), "1.10.0.22000.1");
        assert_eq!(format_version_number(v | (1 << 63), false), "10.0.22000.1");
    }

    #[test]
    fn filetime_conversion() {
        // 2024-01-01 00:00:00 UTC
        assert_eq!(
            format_filetime(133_485_408_000_000_000).as_deref(),
            Some("2024-01-01 00:00:00 UTC")
        );
        assert_eq!(format_filetime(0), None);
    }
}
