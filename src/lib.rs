pub mod error;
pub mod math;
pub mod header;
pub mod hash_tree;
pub mod bat;
pub mod layout;
pub mod validate;
pub mod info;
pub mod container;
pub mod logging;

pub use error::{Result, XvdError};
pub use header::{ContainerHeader, ContainerType, HEADER_SIZE};
pub use layout::{LayoutResolver, RegionDescriptor, RegionKind, RegionLayout};
pub use container::{OpenOptions, XvdFile};
