use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId, PAGE_SIZE};
use crate::index::hash::error::HashTableError;

/// Maximum number of hash bits the directory can use
pub const MAX_DEPTH_BITS: u32 = 9;

/// Physical slot count of the directory arrays; the active prefix is
/// `1 << global_depth`
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_DEPTH_BITS;

const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const GLOBAL_DEPTH_OFFSET: usize = 8;
const LOCAL_DEPTHS_OFFSET: usize = 12;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

// The fixed-size layout must fit in one page
const _: () = assert!(BUCKET_PAGE_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE <= PAGE_SIZE);

/// View interpreting a page's bytes as the extendible-hash directory
///
/// Layout: page_id (i32), lsn (i32), global_depth (u32), then one local
/// depth byte and one bucket page id (i32) per directory slot.
pub struct HashDirectoryPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HashDirectoryPage<B> {
    pub fn new(data: B) -> Self {
        debug_assert!(data.as_ref().len() >= PAGE_SIZE);
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.data.as_ref()[PAGE_ID_OFFSET..])
    }

    pub fn lsn(&self) -> Lsn {
        LittleEndian::read_i32(&self.data.as_ref()[LSN_OFFSET..])
    }

    pub fn global_depth(&self) -> u32 {
        LittleEndian::read_u32(&self.data.as_ref()[GLOBAL_DEPTH_OFFSET..])
    }

    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth()) - 1
    }

    /// Number of active directory slots
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    pub fn bucket_page_id(&self, bucket_idx: usize) -> PageId {
        debug_assert!(bucket_idx < DIRECTORY_ARRAY_SIZE);
        LittleEndian::read_i32(&self.data.as_ref()[BUCKET_PAGE_IDS_OFFSET + 4 * bucket_idx..])
    }

    pub fn local_depth(&self, bucket_idx: usize) -> u32 {
        debug_assert!(bucket_idx < DIRECTORY_ARRAY_SIZE);
        self.data.as_ref()[LOCAL_DEPTHS_OFFSET + bucket_idx] as u32
    }

    /// The directory can halve only when no bucket uses every hash bit
    pub fn can_shrink(&self) -> bool {
        let global_depth = self.global_depth();
        if global_depth == 0 {
            return false;
        }
        (0..self.size()).all(|i| self.local_depth(i) < global_depth)
    }

    /// Assert the directory invariants: every local depth is bounded by the
    /// global depth, every bucket is referenced from exactly
    /// `2^(global_depth - local_depth)` slots, and all references to one
    /// bucket agree on its local depth.
    pub fn verify_integrity(&self) {
        let mut pointer_counts: HashMap<PageId, u32> = HashMap::new();
        let mut local_depths: HashMap<PageId, u32> = HashMap::new();

        for idx in 0..self.size() {
            let bucket_page_id = self.bucket_page_id(idx);
            let local_depth = self.local_depth(idx);
            assert!(
                local_depth <= self.global_depth(),
                "local depth {} of slot {} exceeds global depth {}",
                local_depth,
                idx,
                self.global_depth()
            );

            *pointer_counts.entry(bucket_page_id).or_insert(0) += 1;

            if let Some(&seen) = local_depths.get(&bucket_page_id) {
                assert_eq!(
                    seen, local_depth,
                    "bucket page {} referenced with differing local depths",
                    bucket_page_id
                );
            } else {
                local_depths.insert(bucket_page_id, local_depth);
            }
        }

        for (bucket_page_id, count) in pointer_counts {
            let expected = 1 << (self.global_depth() - local_depths[&bucket_page_id]);
            assert_eq!(
                count, expected,
                "bucket page {} has {} directory pointers, expected {}",
                bucket_page_id, count, expected
            );
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HashDirectoryPage<B> {
    pub fn set_page_id(&mut self, page_id: PageId) {
        LittleEndian::write_i32(&mut self.data.as_mut()[PAGE_ID_OFFSET..], page_id);
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        LittleEndian::write_i32(&mut self.data.as_mut()[LSN_OFFSET..], lsn);
    }

    pub fn set_global_depth(&mut self, global_depth: u32) {
        debug_assert!(global_depth <= MAX_DEPTH_BITS);
        LittleEndian::write_u32(&mut self.data.as_mut()[GLOBAL_DEPTH_OFFSET..], global_depth);
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: usize, bucket_page_id: PageId) {
        debug_assert!(bucket_idx < DIRECTORY_ARRAY_SIZE);
        LittleEndian::write_i32(
            &mut self.data.as_mut()[BUCKET_PAGE_IDS_OFFSET + 4 * bucket_idx..],
            bucket_page_id,
        );
    }

    pub fn set_local_depth(&mut self, bucket_idx: usize, local_depth: u32) {
        debug_assert!(bucket_idx < DIRECTORY_ARRAY_SIZE);
        debug_assert!(local_depth <= MAX_DEPTH_BITS);
        self.data.as_mut()[LOCAL_DEPTHS_OFFSET + bucket_idx] = local_depth as u8;
    }

    pub fn incr_local_depth(&mut self, bucket_idx: usize) {
        let depth = self.local_depth(bucket_idx);
        self.set_local_depth(bucket_idx, depth + 1);
    }

    pub fn decr_local_depth(&mut self, bucket_idx: usize) {
        let depth = self.local_depth(bucket_idx);
        debug_assert!(depth > 0);
        self.set_local_depth(bucket_idx, depth - 1);
    }

    /// Double the directory: slot `i | (1 << old_depth)` inherits the
    /// bucket pointer and local depth of slot `i`.
    pub fn incr_global_depth(&mut self) -> Result<(), HashTableError> {
        let old_depth = self.global_depth();
        if old_depth == MAX_DEPTH_BITS {
            return Err(HashTableError::DirectoryFull);
        }

        let old_size = 1usize << old_depth;
        for i in 0..old_size {
            let mirrored = i | old_size;
            let bucket_page_id = self.bucket_page_id(i);
            let local_depth = self.local_depth(i);
            self.set_bucket_page_id(mirrored, bucket_page_id);
            self.set_local_depth(mirrored, local_depth);
        }
        self.set_global_depth(old_depth + 1);

        Ok(())
    }

    /// Halve the directory. Legal only when `can_shrink` holds.
    pub fn decr_global_depth(&mut self) {
        debug_assert!(self.can_shrink());
        let depth = self.global_depth();
        self.set_global_depth(depth - 1);
    }
}
