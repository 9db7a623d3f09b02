use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{Frame, FrameId, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::DiskManager;

/// One shard of the buffer pool
///
/// All bookkeeping (frame array, page table, free list, replacer,
/// allocation counter) lives under a single mutex, and the mutex is held
/// across disk I/O so the page table and free list can never be observed
/// mid-eviction. Parallelism comes from sharding across instances, not
/// from finer locking inside one.
pub struct BufferPoolInstance {
    pool_size: usize,
    instance_index: usize,
    num_instances: usize,
    disk_manager: Arc<dyn DiskManager>,
    state: Mutex<PoolState>,
}

struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    next_page_id: PageId,
}

impl BufferPoolInstance {
    /// Create a standalone instance that owns the whole page-id space
    pub fn new(pool_size: usize, disk_manager: Arc<dyn DiskManager>) -> Self {
        Self::new_sharded(pool_size, 1, 0, disk_manager)
    }

    /// Create shard `instance_index` of `num_instances`. The instance owns
    /// exactly the page ids congruent to its index and allocates by
    /// striding `num_instances`.
    pub fn new_sharded(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk_manager: Arc<dyn DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "pool must have at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            instance_index,
            num_instances,
            disk_manager,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                next_page_id: instance_index as PageId,
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn instance_index(&self) -> usize {
        self.instance_index
    }

    /// Allocate a fresh page id and pin it into a zeroed frame
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame_id = match self.acquire_frame(state)? {
            Some(frame_id) => frame_id,
            None => return Err(BufferPoolError::BufferPoolFull),
        };

        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id as usize % self.num_instances,
            self.instance_index,
            "allocated ids must route back to this instance"
        );

        state.page_table.insert(page_id, frame_id);
        let frame = &mut state.frames[frame_id];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        {
            let mut page = frame.page.write();
            page.reset(page_id);
        }

        Ok((frame.page.clone(), page_id))
    }

    /// Pin a page, reading it from disk if it is not resident
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &mut state.frames[frame_id];
            if frame.pin_count == 0 {
                state.replacer.pin(frame_id);
            }
            frame.pin_count += 1;
            return Ok(frame.page.clone());
        }

        let frame_id = match self.acquire_frame(state)? {
            Some(frame_id) => frame_id,
            None => return Err(BufferPoolError::BufferPoolFull),
        };

        state.page_table.insert(page_id, frame_id);
        let frame = &mut state.frames[frame_id];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        {
            let mut page = frame.page.write();
            page.page_id = page_id;
            self.disk_manager.read_page(page_id, &mut page.data)?;
        }

        Ok(frame.page.clone())
    }

    /// Drop one pin on a resident page. The caller's dirty flag is OR-ed
    /// into the frame's; the bit is never cleared here.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        let frame = &mut state.frames[frame_id];
        assert!(
            frame.pin_count > 0,
            "unpin of page {} whose pin count is already zero",
            page_id
        );

        frame.pin_count -= 1;
        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk. The dirty bit is left as-is: callers
    /// relying on flush for a clean frame must go through eviction.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let guard = self.state.lock();

        let frame_id = *guard
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        let page = guard.frames[frame_id].page.read();
        self.disk_manager.write_page(page_id, &page.data)?;

        Ok(())
    }

    /// Write every resident page to disk
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let guard = self.state.lock();

        for (&page_id, &frame_id) in guard.page_table.iter() {
            let page = guard.frames[frame_id].page.read();
            self.disk_manager.write_page(page_id, &page.data)?;
        }

        Ok(())
    }

    /// Drop a page from the pool and deallocate its id. Deleting a page
    /// that is not resident succeeds; deleting a pinned page fails. Dirty
    /// contents are discarded, not written back.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => {
                self.disk_manager.deallocate_page(page_id)?;
                return Ok(());
            }
        };

        if state.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        state.page_table.remove(&page_id);
        state.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);

        let frame = &mut state.frames[frame_id];
        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;
        {
            let mut page = frame.page.write();
            page.reset(INVALID_PAGE_ID);
        }

        self.disk_manager.deallocate_page(page_id)?;
        Ok(())
    }

    /// Take a frame from the free list, or evict the LRU victim. A dirty
    /// victim is written back before the frame is reused. Returns None when
    /// every frame is pinned.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<Option<FrameId>, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let frame_id = match state.replacer.victim() {
            Some(frame_id) => frame_id,
            None => return Ok(None),
        };

        let old_page_id = state.frames[frame_id].page_id;
        {
            let frame = &state.frames[frame_id];
            if frame.is_dirty {
                let page = frame.page.read();
                self.disk_manager.write_page(old_page_id, &page.data)?;
            }
        }
        state.page_table.remove(&old_page_id);

        let frame = &mut state.frames[frame_id];
        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;
        {
            let mut page = frame.page.write();
            page.reset(INVALID_PAGE_ID);
        }

        Ok(Some(frame_id))
    }
}

impl BufferPool for BufferPoolInstance {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        BufferPoolInstance::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        BufferPoolInstance::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        BufferPoolInstance::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolInstance::flush_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        BufferPoolInstance::flush_all_pages(self)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolInstance::delete_page(self, page_id)
    }
}
