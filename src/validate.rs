//! Header acceptance checks.
//!
//! Checks run in order and stop at the first failure:
//!
//! 1. the file is larger than the header area
//! 2. magic is `msft-xvd`
//! 3. format version is 2 or 3
//! 4. container type is fixed or dynamic
//! 5. block size is `0xAA000`
//! 6. header size plus every region equals the file size
//!
//! Passing all six is what makes extracted regions trustworthy.  Region
//! queries still work on a header that fails; that is up to the caller.

use std::io::{Read, Seek};

use crate::error::{Result, XvdError};
use crate::header::{ContainerHeader, HEADER_SIZE, XVD_BLOCK_SIZE};
use crate::layout::LayoutResolver;

pub const SUPPORTED_VERSIONS: [u32; 2] = [2, 3];

/// Checks 1–5: everything that does not need the region layout.
pub fn validate_structure(header: &ContainerHeader, file_size: u64) -> Result<()> {
    let minimum = HEADER_SIZE as u64;
    if file_size <= minimum {
        return Err(XvdError::FileTooSmall { size: file_size, minimum });
    }
    if !header.has_valid_magic() {
        return Err(XvdError::InvalidMagic(header.magic));
    }
    if !SUPPORTED_VERSIONS.contains(&header.format_version) {
        return Err(XvdError::UnsupportedVersion(header.format_version));
    }
    header.container_type()?;
    if header.block_size != XVD_BLOCK_SIZE {
        return Err(XvdError::InvalidBlockSize(header.block_size));
    }
    Ok(())
}

/// Check 6 on its own: compare the size the layout implies with `file_size`.
///
/// Returns the expected size when they match.
pub fn check_file_size<R>(header: &ContainerHeader, file_size: u64, reader: &mut R) -> Result<u64>
where
    R: Read + Seek,
{
    let expected = LayoutResolver::new(header).expected_file_size(reader)?;
    match expected.cmp(&file_size) {
        std::cmp::Ordering::Equal   => Ok(expected),
        std::cmp::Ordering::Greater => Err(XvdError::SizeMismatchTruncated { expected, actual: file_size }),
        std::cmp::Ordering::Less    => Err(XvdError::SizeMismatchTrailingData { expected, actual: file_size }),
    }
}

/// Run every check.  For dynamic containers this reads the BAT.
pub fn validate<R>(header: &ContainerHeader, file_size: u64, reader: &mut R) -> Result<()>
where
    R: Read + Seek,
{
    validate_structure(header, file_size)?;
    check_file_size(header, file_size, reader)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{offsets, FLAG_DATA_INTEGRITY_DISABLED, MAGIC};
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Cursor;

    const DRIVE: u64 = 0x4000;

    fn raw_header() -> Vec<u8> {
        let mut raw = vec![0u8; HEADER_SIZE];
        raw[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut raw[offsets::FLAGS..], FLAG_DATA_INTEGRITY_DISABLED);
        LittleEndian::write_u32(&mut raw[offsets::FORMAT_VERSION..], 3);
        LittleEndian::write_u32(&mut raw[offsets::BLOCK_SIZE..], XVD_BLOCK_SIZE);
        LittleEndian::write_u64(&mut raw[offsets::DRIVE_SIZE..], DRIVE);
        raw
    }

    fn check(raw: &[u8], file_size: u64) -> Result<()> {
        let h = ContainerHeader::decode(raw).unwrap();
        validate(&h, file_size, &mut Cursor::new(raw.to_vec()))
    }

    #[test]
    fn accepts_consistent_file() {
        let raw = raw_header();
        check(&raw, HEADER_SIZE as u64 + DRIVE).unwrap();
    }

    #[test]
    fn header_only_file_is_too_small() {
        let raw = raw_header();
        assert!(matches!(
            check(&raw, HEADER_SIZE as u64),
            Err(XvdError::FileTooSmall { size, .. }) if size == HEADER_SIZE as u64
        ));
    }

    #[test]
    fn short_and_long_files() {
        let raw = raw_header();
        let expected = HEADER_SIZE as u64 + DRIVE;
        assert!(matches!(
            check(&raw, expected - 1),
            Err(XvdError::SizeMismatchTruncated { expected: e, actual: a }) if e == expected && a == expected - 1
        ));
        assert!(matches!(
            check(&raw, expected + 1),
            Err(XvdError::SizeMismatchTrailingData { expected: e, .. }) if e == expected
        ));
    }

    #[test]
    fn bad_magic_comes_before_version() {
        let mut raw = raw_header();
        raw[offsets::MAGIC] = b'X';
        LittleEndian::write_u32(&mut raw[offsets::FORMAT_VERSION..], 9);
        assert!(matches!(check(&raw, 0x10000), Err(XvdError::InvalidMagic(m)) if m[0] == b'X'));
    }

    #[test]
    fn version_two_is_accepted() {
        let mut raw = raw_header();
        LittleEndian::write_u32(&mut raw[offsets::FORMAT_VERSION..], 2);
        check(&raw, HEADER_SIZE as u64 + DRIVE).unwrap();

        LittleEndian::write_u32(&mut raw[offsets::FORMAT_VERSION..], 4);
        assert!(matches!(check(&raw, HEADER_SIZE as u64 + DRIVE), Err(XvdError::UnsupportedVersion(4))));
    }

    #[test]
    fn container_type_and_block_size() {
        let mut raw = raw_header();
        LittleEndian::write_u32(&mut raw[offsets::CONTAINER_TYPE..], 2);
        LittleEndian::write_u32(&mut raw[offsets::BLOCK_SIZE..], 0x1000);
        assert!(matches!(check(&raw, 0x10000), Err(XvdError::InvalidContainerType(2))));

        LittleEndian::write_u32(&mut raw[offsets::CONTAINER_TYPE..], 0);
        assert!(matches!(check(&raw, 0x10000), Err(XvdError::InvalidBlockSize(0x1000))));
    }

    #[test]
    fn partial_bat_entry_fails_size_check() {
        let mut raw = raw_header();
        LittleEndian::write_u32(&mut raw[offsets::CONTAINER_TYPE..], 1);
        LittleEndian::write_u32(&mut raw[offsets::DYNAMIC_HEADER_LENGTH..], 6);
        raw.resize(HEADER_SIZE + 0x100, 0);
        assert!(matches!(
            check(&raw, raw.len() as u64),
            Err(XvdError::MalformedTable { size: 6 })
        ));
    }

    #[test]
    fn validation_is_idempotent() {
        let raw = raw_header();
        let a = check(&raw, HEADER_SIZE as u64 + DRIVE - 0x1000).unwrap_err().to_string();
        let b = check(&raw, HEADER_SIZE as u64 + DRIVE - 0x1000).unwrap_err().to_string();
        assert_eq!(a, b);
    }
}
