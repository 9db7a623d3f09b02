use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::instance::BufferPoolInstance;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::DiskManager;

/// Sharded buffer pool: N independent instances, pages routed by
/// `page_id % N`
///
/// Each instance keeps its own mutex, so operations on pages owned by
/// different shards proceed in parallel.
pub struct ParallelBufferPoolManager {
    instances: Vec<BufferPoolInstance>,
    /// Rotates so allocation pressure spreads across instances
    start_index: Mutex<usize>,
}

impl ParallelBufferPoolManager {
    pub fn new(
        num_instances: usize,
        pool_size: usize,
        disk_manager: Arc<dyn DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "pool must have at least one instance");

        let instances = (0..num_instances)
            .map(|i| {
                BufferPoolInstance::new_sharded(pool_size, num_instances, i, disk_manager.clone())
            })
            .collect();

        Self {
            instances,
            start_index: Mutex::new(0),
        }
    }

    /// Total number of frames across all instances
    pub fn pool_size(&self) -> usize {
        self.instances.len() * self.instances[0].pool_size()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolInstance {
        &self.instances[page_id as usize % self.instances.len()]
    }

    /// Allocate from the instances round-robin, starting at the rotating
    /// index; the first instance with a free frame wins. The start index
    /// advances whether or not the allocation succeeded.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut start = self.start_index.lock();
        let num_instances = self.instances.len();

        let mut result = Err(BufferPoolError::BufferPoolFull);
        for i in 0..num_instances {
            let instance = &self.instances[(*start + i) % num_instances];
            if let Ok(page) = instance.new_page() {
                result = Ok(page);
                break;
            }
        }

        *start = (*start + 1) % num_instances;
        result
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }
}

impl BufferPool for ParallelBufferPoolManager {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        ParallelBufferPoolManager::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        ParallelBufferPoolManager::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::flush_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::flush_all_pages(self)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::delete_page(self, page_id)
    }
}
