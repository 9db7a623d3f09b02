pub mod bucket;
pub mod directory;
pub mod error;
pub mod slot;
pub mod table;

pub use bucket::{bucket_capacity, BucketInsert, HashBucketPage};
pub use directory::{HashDirectoryPage, DIRECTORY_ARRAY_SIZE, MAX_DEPTH_BITS};
pub use error::HashTableError;
pub use slot::SlotCodec;
pub use table::ExtendibleHashTable;
