//! Pooled allocator for chunk memory blocks.
//!
//! Chunks are always exactly [CHUNK_BLOCK_SIZE] bytes, so instead of hitting
//! the global allocator per chunk, memory is carved out of larger pages of
//! [BLOCKS_PER_PAGE] blocks each. Free blocks within a page are tracked by an
//! implicit free list (the same index-reuse trick the entity table uses),
//! which keeps per-page bookkeeping to a few dozen bytes. Pages whose blocks
//! are all free are unmapped once another page with spare capacity exists, so
//! a burst of chunk churn does not pin its peak memory forever.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use tracing::trace;

/// The size of one chunk memory block in bytes.
pub const CHUNK_BLOCK_SIZE: usize = 16 * 1024;

/// The number of blocks carved out of one page.
pub const BLOCKS_PER_PAGE: u32 = 48;

/// The alignment of every block; one x86 cache line.
pub const BLOCK_ALIGN: usize = 64;

const NO_BLOCK: u8 = u8::MAX;

fn page_layout() -> Layout {
    Layout::from_size_align(CHUNK_BLOCK_SIZE * BLOCKS_PER_PAGE as usize, BLOCK_ALIGN)
        .expect("invalid page layout")
}

/// Identifies an allocated block so it can be returned to the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    page: u32,
    block: u8,
}

struct Page {
    /// `None` when the page's memory has been released back to the OS.
    data: Option<NonNull<u8>>,
    /// Implicit free list links. `links[i]` is the next free block after
    /// block `i`; only meaningful while block `i` is free.
    links: [u8; BLOCKS_PER_PAGE as usize],
    /// Head of the free list within this page.
    next_free: u8,
    /// Number of blocks handed out from this page.
    used: u8,
    /// Number of blocks ever touched; blocks beyond this are virgin and do
    /// not need to appear on the free list.
    initialized: u8,
}

impl Page {
    fn map() -> Self {
        let layout = page_layout();
        // Safety: the layout has non-zero size.
        let ptr = unsafe { alloc(layout) };
        let data = NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(layout));
        Self {
            data: Some(data),
            links: [NO_BLOCK; BLOCKS_PER_PAGE as usize],
            next_free: NO_BLOCK,
            used: 0,
            initialized: 0,
        }
    }

    fn unmap(&mut self) {
        if let Some(data) = self.data.take() {
            // Safety: the pointer was produced by `alloc` with this layout.
            unsafe { dealloc(data.as_ptr(), page_layout()) };
        }
    }

    fn has_space(&self) -> bool {
        self.data.is_some()
            && (self.next_free != NO_BLOCK || self.initialized < BLOCKS_PER_PAGE as u8)
    }

    fn alloc_block(&mut self) -> (u8, NonNull<u8>) {
        let data = self.data.expect("allocation from unmapped page");
        let block = if self.next_free != NO_BLOCK {
            let block = self.next_free;
            self.next_free = self.links[block as usize];
            block
        } else {
            debug_assert!(self.initialized < BLOCKS_PER_PAGE as u8);
            let block = self.initialized;
            self.initialized += 1;
            block
        };
        self.used += 1;

        // Safety: block < BLOCKS_PER_PAGE, so the offset stays inside the
        // page allocation.
        let ptr = unsafe { NonNull::new_unchecked(data.as_ptr().add(block as usize * CHUNK_BLOCK_SIZE)) };
        (block, ptr)
    }

    fn free_block(&mut self, block: u8) {
        debug_assert!(block < self.initialized);
        debug_assert!(self.used > 0);
        self.links[block as usize] = self.next_free;
        self.next_free = block;
        self.used -= 1;
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        self.unmap();
    }
}

// Safety: the page exclusively owns its allocation; references into block
// memory are only produced through the world's borrow discipline.
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

/// Point-in-time usage statistics for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkAllocatorStats {
    /// Number of mapped pages.
    pub pages: u32,
    /// Total blocks across mapped pages.
    pub blocks_total: u32,
    /// Blocks currently handed out.
    pub blocks_used: u32,
    /// Total bytes of mapped page memory.
    pub bytes_total: u64,
    /// Bytes of block memory currently handed out.
    pub bytes_used: u64,
}

/// Arena of fixed-size chunk memory blocks.
#[derive(Default)]
pub struct ChunkAllocator {
    pages: Vec<Page>,
    /// Indices of mapped pages which still have free blocks.
    open_pages: Vec<u32>,
    /// Indices of unmapped page slots available for reuse.
    dead_pages: Vec<u32>,
}

impl ChunkAllocator {
    /// Constructs an empty allocator; no memory is mapped until the first
    /// block is requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates one block.
    ///
    /// Aborts via the global allocation error handler if the OS refuses a
    /// new page; there is no recovery path for that condition.
    pub fn alloc_block(&mut self) -> (BlockHandle, NonNull<u8>) {
        let page_index = match self.open_pages.last() {
            Some(&index) => index,
            None => {
                let index = if let Some(index) = self.dead_pages.pop() {
                    self.pages[index as usize] = Page::map();
                    index
                } else {
                    self.pages.push(Page::map());
                    (self.pages.len() - 1) as u32
                };
                trace!(page = index, "mapped chunk page");
                self.open_pages.push(index);
                index
            }
        };

        let page = &mut self.pages[page_index as usize];
        let (block, ptr) = page.alloc_block();
        if !page.has_space() {
            self.open_pages.retain(|&p| p != page_index);
        }

        (
            BlockHandle {
                page: page_index,
                block,
            },
            ptr,
        )
    }

    /// Returns a block to the pool.
    pub fn free_block(&mut self, handle: BlockHandle) {
        let page_index = handle.page;
        let page = &mut self.pages[page_index as usize];
        let was_full = !page.has_space();
        page.free_block(handle.block);

        if was_full {
            self.open_pages.push(page_index);
        }

        // Unmap fully free pages, but keep one around as a warm reserve so a
        // steady alloc/free cycle at a page boundary does not thrash mmap.
        if page.used == 0 && self.open_pages.len() > 1 {
            page.unmap();
            self.open_pages.retain(|&p| p != page_index);
            self.dead_pages.push(page_index);
            trace!(page = page_index, "unmapped empty chunk page");
        }
    }

    /// Returns current usage statistics.
    pub fn stats(&self) -> ChunkAllocatorStats {
        let mut stats = ChunkAllocatorStats::default();
        for page in &self.pages {
            if page.data.is_some() {
                stats.pages += 1;
                stats.blocks_total += BLOCKS_PER_PAGE;
                stats.blocks_used += u32::from(page.used);
            }
        }
        stats.bytes_total = u64::from(stats.blocks_total) * CHUNK_BLOCK_SIZE as u64;
        stats.bytes_used = u64::from(stats.blocks_used) * CHUNK_BLOCK_SIZE as u64;
        stats
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blocks_are_distinct_and_aligned() {
        let mut allocator = ChunkAllocator::new();
        let (a, pa) = allocator.alloc_block();
        let (b, pb) = allocator.alloc_block();
        assert_ne!(a, b);
        assert_ne!(pa, pb);
        assert_eq!(pa.as_ptr() as usize % BLOCK_ALIGN, 0);
        assert_eq!(pb.as_ptr() as usize % BLOCK_ALIGN, 0);
    }

    #[test]
    fn freed_blocks_are_recycled() {
        let mut allocator = ChunkAllocator::new();
        let (a, pa) = allocator.alloc_block();
        allocator.free_block(a);
        let (_, pb) = allocator.alloc_block();
        assert_eq!(pa, pb);
        assert_eq!(allocator.stats().pages, 1);
    }

    #[test]
    fn page_overflow_maps_new_page() {
        let mut allocator = ChunkAllocator::new();
        let handles: Vec<_> = (0..BLOCKS_PER_PAGE + 1)
            .map(|_| allocator.alloc_block().0)
            .collect();

        let stats = allocator.stats();
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.blocks_used, BLOCKS_PER_PAGE + 1);

        for handle in handles {
            allocator.free_block(handle);
        }
        let stats = allocator.stats();
        assert_eq!(stats.blocks_used, 0);
        // One warm page stays mapped.
        assert_eq!(stats.pages, 1);
    }

    #[test]
    fn stats_track_usage() {
        let mut allocator = ChunkAllocator::new();
        assert_eq!(allocator.stats(), ChunkAllocatorStats::default());

        let (handle, _) = allocator.alloc_block();
        let stats = allocator.stats();
        assert_eq!(stats.blocks_used, 1);
        assert_eq!(stats.bytes_used, CHUNK_BLOCK_SIZE as u64);

        allocator.free_block(handle);
        assert_eq!(allocator.stats().blocks_used, 0);
    }
}
