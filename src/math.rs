//! Page and block arithmetic.
//!
//! Every conversion that can grow a value is checked and reports
//! [`XvdError::SizeOverflow`] instead of wrapping.  Conversions that only
//! shrink a value (bytes → pages, bytes → blocks) are total.

use crate::error::{Result, XvdError};

/// Granularity of most regions and of every hash tree node.
pub const PAGE_SIZE: u64 = 0x1000;
/// Allocation unit mapped by one BAT entry (680 KiB, 170 pages).
pub const BLOCK_SIZE: u64 = 0xAA000;

#[inline]
fn div_ceil(n: u64, d: u64) -> u64 {
    n / d + u64::from(n % d != 0)
}

/// Pages needed to hold `bytes` bytes.
pub fn bytes_to_pages(bytes: u64) -> u64 {
    div_ceil(bytes, PAGE_SIZE)
}

pub fn pages_to_bytes(pages: u64) -> Result<u64> {
    pages.checked_mul(PAGE_SIZE).ok_or(XvdError::SizeOverflow("pages to bytes"))
}

/// Blocks needed to hold `bytes` bytes.
pub fn bytes_to_blocks(bytes: u64) -> u64 {
    div_ceil(bytes, BLOCK_SIZE)
}

pub fn blocks_to_bytes(blocks: u64) -> Result<u64> {
    blocks.checked_mul(BLOCK_SIZE).ok_or(XvdError::SizeOverflow("blocks to bytes"))
}

pub fn pages_to_blocks(pages: u64) -> Result<u64> {
    Ok(bytes_to_blocks(pages_to_bytes(pages)?))
}

pub fn is_page_aligned(bytes: u64) -> bool {
    bytes % PAGE_SIZE == 0
}

/// Round `bytes` up to the next page boundary; identity when already aligned.
pub fn align_to_page(bytes: u64) -> Result<u64> {
    if is_page_aligned(bytes) {
        return Ok(bytes);
    }
    (bytes / PAGE_SIZE + 1)
        .checked_mul(PAGE_SIZE)
        .ok_or(XvdError::SizeOverflow("page alignment"))
}

/// Sum a sequence of sizes, failing on overflow.
pub fn checked_sum<I>(sizes: I, what: &'static str) -> Result<u64>
where
    I: IntoIterator<Item = u64>,
{
    sizes
        .into_iter()
        .try_fold(0u64, |acc, n| acc.checked_add(n))
        .ok_or(XvdError::SizeOverflow(what))
}
