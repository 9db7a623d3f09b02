use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::hash::bucket::{bucket_capacity, BucketInsert, HashBucketPage};
use crate::index::hash::directory::{HashDirectoryPage, MAX_DEPTH_BITS};
use crate::index::hash::error::HashTableError;
use crate::index::hash::slot::SlotCodec;
use crate::storage::buffer::BufferPool;

/// Routing hash: 64 bits from the hash function, truncated to 32 for the
/// directory
fn default_hash<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Disk-resident extendible hash table
///
/// The directory and every bucket live in buffer-pool pages; this struct
/// only holds the directory's page id. A table-level reader-writer latch
/// covers directory routing; structural changes (split, merge, shrink)
/// take it in write mode while lookups and single-bucket updates share it
/// in read mode. Bucket pages are latched through their buffer-pool page
/// locks, and the table latch is always acquired before any bucket latch
/// and dropped before bucket data is scanned.
pub struct ExtendibleHashTable<K, V> {
    directory_page_id: PageId,
    buffer_pool: Arc<dyn BufferPool>,
    table_latch: RwLock<()>,
    hash_fn: Box<dyn Fn(&K) -> u64 + Send + Sync>,
    _marker: PhantomData<fn() -> V>,
}

impl<K: SlotCodec + Hash + 'static, V: SlotCodec> ExtendibleHashTable<K, V> {
    /// Create a table routed by the default hash function
    pub fn new(buffer_pool: Arc<dyn BufferPool>) -> Result<Self, HashTableError> {
        Self::with_hash_fn(buffer_pool, Box::new(default_hash::<K>))
    }
}

impl<K: SlotCodec, V: SlotCodec> ExtendibleHashTable<K, V> {
    /// Create a table with an injected hash function. The directory starts
    /// at global depth zero with a single empty bucket.
    pub fn with_hash_fn(
        buffer_pool: Arc<dyn BufferPool>,
        hash_fn: Box<dyn Fn(&K) -> u64 + Send + Sync>,
    ) -> Result<Self, HashTableError> {
        let (directory_page, directory_page_id) = buffer_pool.new_page()?;
        let (_bucket_page, bucket_page_id) = buffer_pool.new_page()?;

        {
            let mut guard = directory_page.write();
            let mut directory = HashDirectoryPage::new(&mut guard.data[..]);
            directory.set_page_id(directory_page_id);
            directory.set_global_depth(0);
            directory.set_local_depth(0, 0);
            directory.set_bucket_page_id(0, bucket_page_id);
        }

        // A fresh page is zeroed, which is exactly an empty bucket
        buffer_pool.unpin_page(directory_page_id, true)?;
        buffer_pool.unpin_page(bucket_page_id, true)?;

        Ok(Self {
            directory_page_id,
            buffer_pool,
            table_latch: RwLock::new(()),
            hash_fn,
            _marker: PhantomData,
        })
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    fn hash(&self, key: &K) -> u32 {
        (self.hash_fn)(key) as u32
    }

    /// Look up every value stored under `key`
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashTableError> {
        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let table_guard = self.table_latch.read();

        let bucket_page_id = {
            let guard = directory_page.read();
            let directory = HashDirectoryPage::new(&guard.data[..]);
            let index = (self.hash(key) & directory.global_depth_mask()) as usize;
            directory.bucket_page_id(index)
        };

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let bucket_guard = bucket_page.read();
        drop(table_guard);
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;

        let mut result = Vec::new();
        {
            let bucket = HashBucketPage::<_, K, V>::new(&bucket_guard.data[..]);
            bucket.get_value(key, &mut result);
        }
        drop(bucket_guard);
        self.buffer_pool.unpin_page(bucket_page_id, false)?;

        Ok(result)
    }

    /// Insert a (key, value) pair. Returns false when the exact pair is
    /// already present. A full bucket triggers a split and a retry, so a
    /// single call may grow the directory more than once.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        loop {
            let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
            let table_guard = self.table_latch.read();

            let bucket_page_id = {
                let guard = directory_page.read();
                let directory = HashDirectoryPage::new(&guard.data[..]);
                let index = (self.hash(key) & directory.global_depth_mask()) as usize;
                directory.bucket_page_id(index)
            };

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut bucket_guard = bucket_page.write();
            drop(table_guard);
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;

            let outcome = {
                let mut bucket = HashBucketPage::<_, K, V>::new(&mut bucket_guard.data[..]);
                bucket.insert(key, value)
            };
            drop(bucket_guard);

            match outcome {
                BucketInsert::Ok => {
                    self.buffer_pool.unpin_page(bucket_page_id, true)?;
                    return Ok(true);
                }
                BucketInsert::Duplicate => {
                    self.buffer_pool.unpin_page(bucket_page_id, false)?;
                    return Ok(false);
                }
                BucketInsert::Full => {
                    self.buffer_pool.unpin_page(bucket_page_id, false)?;
                    self.split_insert(key)?;
                }
            }
        }
    }

    /// Split the bucket `key` routes to, growing the directory when the
    /// bucket already uses every directory bit. The caller retries the
    /// insert afterwards.
    fn split_insert(&self, key: &K) -> Result<(), HashTableError> {
        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let table_guard = self.table_latch.write();

        let (index, bucket_page_id, local_depth, global_depth) = {
            let guard = directory_page.read();
            let directory = HashDirectoryPage::new(&guard.data[..]);
            let index = (self.hash(key) & directory.global_depth_mask()) as usize;
            (
                index,
                directory.bucket_page_id(index),
                directory.local_depth(index),
                directory.global_depth(),
            )
        };

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

        // Another writer may have split this bucket while we waited for
        // the write latch; in that case the retry loop will find room.
        let still_full = {
            let guard = bucket_page.read();
            let bucket = HashBucketPage::<_, K, V>::new(&guard.data[..]);
            bucket.is_full()
        };
        if !still_full {
            drop(table_guard);
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(());
        }

        if local_depth == global_depth && global_depth == MAX_DEPTH_BITS {
            drop(table_guard);
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Err(HashTableError::DirectoryFull);
        }

        let (new_page, new_page_id) = self.buffer_pool.new_page()?;
        debug!(
            "splitting bucket page {} (local depth {}) into page {}",
            bucket_page_id, local_depth, new_page_id
        );

        {
            let mut directory_guard = directory_page.write();
            let mut directory = HashDirectoryPage::new(&mut directory_guard.data[..]);
            let mut bucket_guard = bucket_page.write();
            let mut new_guard = new_page.write();

            if local_depth == directory.global_depth() {
                directory.incr_global_depth()?;
            }

            // Every slot sharing the bucket's low bits deepens by one;
            // slots with the next bit set move to the new page.
            let step = 1usize << local_depth;
            let low_bits = index & (step - 1);
            let mut slot = low_bits;
            while slot < directory.size() {
                directory.incr_local_depth(slot);
                if slot & step != 0 {
                    directory.set_bucket_page_id(slot, new_page_id);
                }
                slot += step;
            }

            // Re-partition live pairs between the two buckets
            let mut old_bucket = HashBucketPage::<_, K, V>::new(&mut bucket_guard.data[..]);
            let mut new_bucket = HashBucketPage::<_, K, V>::new(&mut new_guard.data[..]);
            let new_mask = ((step << 1) - 1) as u32;
            let new_pattern = (low_bits | step) as u32;
            for slot in 0..bucket_capacity::<K, V>() {
                if !old_bucket.is_occupied(slot) {
                    break;
                }
                if !old_bucket.is_readable(slot) {
                    continue;
                }
                let slot_key = old_bucket.key_at(slot);
                if self.hash(&slot_key) & new_mask == new_pattern {
                    let slot_value = old_bucket.value_at(slot);
                    new_bucket.insert(&slot_key, &slot_value);
                    old_bucket.remove_at(slot);
                }
            }
        }

        drop(table_guard);
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        self.buffer_pool.unpin_page(bucket_page_id, true)?;
        self.buffer_pool.unpin_page(new_page_id, true)?;
        Ok(())
    }

    /// Remove one (key, value) pair. An emptied bucket attempts to merge
    /// with its split image.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let table_guard = self.table_latch.read();

        let (bucket_page_id, global_depth) = {
            let guard = directory_page.read();
            let directory = HashDirectoryPage::new(&guard.data[..]);
            let index = (self.hash(key) & directory.global_depth_mask()) as usize;
            (directory.bucket_page_id(index), directory.global_depth())
        };

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let mut bucket_guard = bucket_page.write();
        drop(table_guard);
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;

        let (removed, now_empty) = {
            let mut bucket = HashBucketPage::<_, K, V>::new(&mut bucket_guard.data[..]);
            let removed = bucket.remove(key, value);
            (removed, bucket.is_empty())
        };
        drop(bucket_guard);
        self.buffer_pool.unpin_page(bucket_page_id, removed)?;

        if removed && now_empty && global_depth > 0 {
            self.merge(key)?;
        }

        Ok(removed)
    }

    /// Fold an empty bucket into its split image and shrink the directory
    /// if every bucket then fits in fewer bits
    fn merge(&self, key: &K) -> Result<(), HashTableError> {
        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let table_guard = self.table_latch.write();

        let merged = {
            let mut directory_guard = directory_page.write();
            let mut directory = HashDirectoryPage::new(&mut directory_guard.data[..]);
            self.merge_into_image(&mut directory, key)?
        };

        drop(table_guard);
        self.buffer_pool
            .unpin_page(self.directory_page_id, merged != INVALID_PAGE_ID)?;

        if merged != INVALID_PAGE_ID {
            // The emptied page's id is gone for good if the delete fails;
            // ids are never recycled anyway.
            let _ = self.buffer_pool.delete_page(merged);
        }

        Ok(())
    }

    /// Perform the merge under the table write latch. Returns the page id
    /// of the emptied bucket, or INVALID_PAGE_ID when no merge applies.
    fn merge_into_image(
        &self,
        directory: &mut HashDirectoryPage<&mut [u8]>,
        key: &K,
    ) -> Result<PageId, HashTableError> {
        let index = (self.hash(key) & directory.global_depth_mask()) as usize;
        let bucket_page_id = directory.bucket_page_id(index);
        let local_depth = directory.local_depth(index);
        if local_depth == 0 {
            return Ok(INVALID_PAGE_ID);
        }

        // The bucket must still be empty now that we hold the write latch
        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let empty = {
            let guard = bucket_page.read();
            let bucket = HashBucketPage::<_, K, V>::new(&guard.data[..]);
            bucket.is_empty()
        };
        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        if !empty {
            return Ok(INVALID_PAGE_ID);
        }

        // Merging is only legal with an image at the same depth
        let image = index ^ (1usize << (local_depth - 1));
        if directory.local_depth(image) != local_depth {
            return Ok(INVALID_PAGE_ID);
        }
        let image_page_id = directory.bucket_page_id(image);

        debug!(
            "merging empty bucket page {} into image page {}",
            bucket_page_id, image_page_id
        );

        let step = 1usize << (local_depth - 1);
        let low_bits = index & (step - 1);
        let mut slot = low_bits;
        while slot < directory.size() {
            directory.set_bucket_page_id(slot, image_page_id);
            directory.decr_local_depth(slot);
            slot += step;
        }

        if directory.can_shrink() {
            directory.decr_global_depth();
        }

        Ok(bucket_page_id)
    }

    /// Current global depth, taken under the table latch
    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let table_guard = self.table_latch.read();
        let depth = {
            let guard = directory_page.read();
            HashDirectoryPage::new(&guard.data[..]).global_depth()
        };
        drop(table_guard);
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(depth)
    }

    /// Assert the directory invariants; used by debug builds and tests
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let table_guard = self.table_latch.read();
        {
            let guard = directory_page.read();
            HashDirectoryPage::new(&guard.data[..]).verify_integrity();
        }
        drop(table_guard);
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(())
    }
}
