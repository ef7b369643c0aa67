//! Integrity hash tree sizing.
//!
//! The tree covers the data regions (user data, vm-config, dynamic header and
//! drive) one 4 KiB page per leaf hash.  Each tree page holds up to
//! [`HASHES_PER_PAGE`] truncated 24-byte hashes, so every level is the
//! previous level divided by 170, rounded up.  On disk the levels are stored
//! root-most first, but only their sizes matter here.
//!
//! Level termination: the tree ends at the first level whose page count is
//! at most one; that page is what the root hash in the header is computed
//! over.  The format supports levels 0 to 3, which bounds the hashable data
//! at [`MAX_DATA_PAGES`] pages (about 3.1 TiB).
//!
//! ```text
//!   data pages   800
//!   level 0      ceil(800 / 170) = 5 pages
//!   level 1      ceil(5 / 170)   = 1 page   <- root computed here
//!   total        6 pages = 24 KiB
//! ```
//!
//! A resilient tree stores a second copy of every level, doubling its size.

use crate::error::{Result, XvdError};
use crate::math::pages_to_bytes;

/// Child hashes summarised by one tree page.
pub const HASHES_PER_PAGE: u64 = 170;
/// Levels 0..=3.
pub const MAX_LEVELS: usize = 4;
/// Largest data page count a four-level tree can cover (170^4).
pub const MAX_DATA_PAGES: u64 = HASHES_PER_PAGE
    * HASHES_PER_PAGE
    * HASHES_PER_PAGE
    * HASHES_PER_PAGE;

/// Per-level page counts of a sized tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HashTreeShape {
    /// Pages in each level; levels past `depth` are zero.
    pub level_pages: [u64; MAX_LEVELS],
    /// Number of populated levels (0 when nothing is hashed).
    pub depth:       usize,
    /// Whether the tree is stored twice.
    pub resilient:   bool,
}

impl HashTreeShape {
    /// Pages of one copy of the tree.
    pub fn pages_per_copy(&self) -> u64 {
        self.level_pages.iter().sum()
    }

    pub fn total_pages(&self) -> u64 {
        if self.resilient {
            2 * self.pages_per_copy()
        } else {
            self.pages_per_copy()
        }
    }

    pub fn size_bytes(&self) -> Result<u64> {
        pages_to_bytes(self.total_pages())
    }
}

#[inline]
fn parent_pages(child_pages: u64) -> u64 {
    child_pages / HASHES_PER_PAGE + u64::from(child_pages % HASHES_PER_PAGE != 0)
}

/// Work out how many pages each level of the tree needs for `data_pages`
/// pages of hashed data.
pub fn tree_shape(data_pages: u64, resilient: bool) -> Result<HashTreeShape> {
    let mut shape = HashTreeShape { resilient, ..Default::default() };

    let mut pages = parent_pages(data_pages);
    for level in 0..MAX_LEVELS {
        shape.level_pages[level] = pages;
        shape.depth = level + 1;
        if pages <= 1 {
            break;
        }
        if level == MAX_LEVELS - 1 {
            // Level 3 must collapse to the single root page.
            return Err(XvdError::HashTreeLevelOverflow { data_pages });
        }
        pages = parent_pages(pages);
    }

    if data_pages == 0 {
        shape.depth = 0;
    }
    Ok(shape)
}

/// Size in bytes of the hash tree protecting `data_pages` pages.
pub fn tree_size_bytes(data_pages: u64, resilient: bool) -> Result<u64> {
    tree_shape(data_pages, resilient)?.size_bytes()
}
