//! # tickraft-storage
//!
//! why: persist the replicated log and the node's hard state in a compact
//! binary layout that survives crashes mid-write
//! relations: used by tickraft-server, encodes tickraft-core records
//! what: Log over two Regions (index + data), Superblock, member-set codec

pub mod error;
pub mod log;
pub mod region;
pub mod superblock;

pub use error::{Result, StorageError};
pub use log::{Log, LOG_DEFAULT_CAPACITY};
pub use region::{MemoryRegion, Region};
pub use superblock::{decode_members, encode_members, Superblock, SUPER_BLOCK_SIZE};
