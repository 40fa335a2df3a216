//! Page descriptor and type operations (spec.md §4.5, C5): a tagged union
//! `{Uninit, Anon, File}` with virtual dispatch of
//! `initialize/swap_in/swap_out/destroy`.
//!
//! Grounded on `original_source/vm/anon.c` and `vm/file.c`'s
//! `page_operations` vtables, collapsed per design note §9 ("virtual
//! dispatch on page type... maps to a tagged variant... or to a trait-like
//! interface") into one `PageKind` enum matched in each method, rather than
//! a function-pointer table — the Uninit→destination mutation becomes
//! `self.kind = PageKind::Anon { .. }` in place, exactly mirroring the
//! source's `page->operations = &anon_ops` assignment.

use crate::fs::FileHandle;
use crate::kalloc::{PageAllocator, PalFlags};
use crate::mmu::{Mmu, UserVa};
use crate::param::PGSIZE;
use crate::vm::swap::{SwapSlot, SwapTable};

/// Borrowed collaborators a page needs to service `swap_in`/`swap_out`.
/// File-backed pages don't need a device/FAT handle here because their
/// `FileHandle` already carries its own reference to the mounted
/// `FsState` (spec.md §9: "pass a handle explicitly rather than through
/// globals" — the handle *is* that explicit reference for file I/O).
pub struct PageIoCtx<'a> {
    pub allocator: &'a mut dyn PageAllocator,
    pub swap: &'a mut SwapTable,
    pub mmu: &'a mut dyn Mmu,
}

/// What an Uninit page turns into on its first fault (spec.md §3: "a
/// pending page: its first fault triggers `init_fn(page, init_arg)` and
/// mutates the descriptor's tag to `destination_type`").
pub enum Uninit {
    /// Demand-zero anonymous memory (stack growth, bss).
    Anon,
    /// Lazily-mapped file region (mmap), spec.md §4.8.
    File {
        handle: FileHandle,
        offset: u32,
        read_bytes: u32,
    },
}

/// The page's current type tag and type-specific state (spec.md §3).
pub enum PageKind {
    Uninit(Uninit),
    /// `swap_slot = None` means resident or never evicted (spec.md's
    /// `-1` sentinel).
    Anon { swap_slot: Option<SwapSlot> },
    File {
        handle: FileHandle,
        offset: u32,
        read_bytes: u32,
    },
}

impl PageKind {
    pub fn is_uninit(&self) -> bool {
        matches!(self, PageKind::Uninit(_))
    }

    pub fn is_anon(&self) -> bool {
        matches!(self, PageKind::Anon { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, PageKind::File { .. })
    }
}

/// A page descriptor (spec.md §3): user VA, writability, current type,
/// an optional back-pointer to the frame table slot holding it, and an
/// optional mmap grouping tag used by `munmap` to find the contiguous
/// region it installed (spec.md §4.8: "implementations may tag pages with
/// a mapping id").
pub struct Page {
    pub va: UserVa,
    pub writable: bool,
    pub kind: PageKind,
    /// Index into the owning `FrameTable`, or `None` if not resident.
    pub frame: Option<usize>,
    pub is_stack: bool,
    pub mapping_id: Option<UserVa>,
}

impl Page {
    pub fn new(va: UserVa, writable: bool, kind: PageKind) -> Self {
        debug_assert_eq!(va % PGSIZE, 0, "page VA must be page-aligned");
        Self {
            va,
            writable,
            kind,
            frame: None,
            is_stack: false,
            mapping_id: None,
        }
    }

    pub fn stack(va: UserVa) -> Self {
        let mut p = Self::new(va, true, PageKind::Uninit(Uninit::Anon));
        p.is_stack = true;
        p
    }

    pub fn mmap_uninit(va: UserVa, writable: bool, handle: FileHandle, offset: u32, read_bytes: u32) -> Self {
        let mut p = Self::new(
            va,
            writable,
            PageKind::Uninit(Uninit::File {
                handle,
                offset,
                read_bytes,
            }),
        );
        p.mapping_id = Some(va);
        p
    }

    /// Populates `kva`'s contents from this page's backing store, resolving
    /// Uninit to its destination type on the way (spec.md §4.5).
    ///
    /// Returns `false` on I/O or resource failure (e.g. the destination
    /// type couldn't get a swap slot reserved ahead of time — this crate's
    /// swap_in never needs one, but file pages can still fail to read).
    pub fn swap_in(&mut self, ctx: &mut PageIoCtx<'_>, kva: usize) -> bool {
        let bytes = ctx.allocator.bytes_mut(kva);
        match core::mem::replace(&mut self.kind, PageKind::Anon { swap_slot: None }) {
            PageKind::Uninit(Uninit::Anon) => {
                *bytes = [0u8; PGSIZE];
                self.kind = PageKind::Anon { swap_slot: None };
                true
            }
            PageKind::Uninit(Uninit::File {
                handle,
                offset,
                read_bytes,
            }) => {
                let n = handle.read_at(&mut bytes[..read_bytes as usize], offset);
                for b in &mut bytes[n..] {
                    *b = 0;
                }
                let ok = n as u32 == read_bytes;
                self.kind = PageKind::File {
                    handle,
                    offset,
                    read_bytes,
                };
                ok
            }
            PageKind::Anon { swap_slot: Some(slot) } => {
                ctx.swap.read(slot, bytes);
                ctx.swap.release(slot);
                self.kind = PageKind::Anon { swap_slot: None };
                true
            }
            PageKind::Anon { swap_slot: None } => {
                // Never evicted (e.g. COW's fresh copy target): nothing to
                // pull in, the frame already carries the right bytes.
                self.kind = PageKind::Anon { swap_slot: None };
                true
            }
            PageKind::File {
                handle,
                offset,
                read_bytes,
            } => {
                let n = handle.read_at(&mut bytes[..read_bytes as usize], offset);
                for b in &mut bytes[n..] {
                    *b = 0;
                }
                let ok = n as u32 == read_bytes;
                self.kind = PageKind::File {
                    handle,
                    offset,
                    read_bytes,
                };
                ok
            }
        }
    }

    /// Writes dirty contents back to the backing store and clears the
    /// present bit (spec.md §4.5). Called by the frame table's `evict`.
    pub fn swap_out(&mut self, ctx: &mut PageIoCtx<'_>, kva: usize) -> bool {
        let ok = match &self.kind {
            PageKind::Anon { .. } => {
                let Some(slot) = ctx.swap.allocate() else {
                    return false;
                };
                let bytes = ctx.allocator.bytes_mut(kva);
                ctx.swap.write(slot, bytes);
                self.kind = PageKind::Anon { swap_slot: Some(slot) };
                true
            }
            PageKind::File {
                handle,
                offset,
                read_bytes,
            } => {
                if ctx.mmu.is_dirty(self.va) {
                    let bytes = ctx.allocator.bytes_mut(kva);
                    handle.write_at(&bytes[..*read_bytes as usize], *offset);
                    ctx.mmu.set_dirty(self.va, false);
                }
                true
            }
            PageKind::Uninit(_) => {
                // An uninit page is never resident; evicting one is a bug
                // in the caller, not a recoverable condition.
                unreachable!("uninit pages are never installed in a frame")
            }
        };
        ctx.mmu.clear(self.va);
        self.frame = None;
        ok
    }

    /// Releases type-specific resources. The descriptor itself is freed by
    /// the caller (spec.md §4.5).
    pub fn destroy(&mut self, ctx: &mut PageIoCtx<'_>) {
        match &self.kind {
            PageKind::Anon {
                swap_slot: Some(slot),
            } => ctx.swap.release(*slot),
            PageKind::File { .. } => {
                // No-op: the handle closes (and, if dirty, writes back)
                // through `munmap`, not here (spec.md §4.5).
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalloc::FreeListAllocator;
    use crate::mmu::fake::FakeMmu;
    use crate::vm::swap::SwapTable;
    use crate::bio::MemDisk;
    use alloc::boxed::Box;

    fn ctx<'a>(alloc: &'a mut FreeListAllocator<4>, swap: &'a mut SwapTable, mmu: &'a mut FakeMmu) -> PageIoCtx<'a> {
        PageIoCtx {
            allocator: alloc,
            swap,
            mmu,
        }
    }

    #[test]
    fn uninit_anon_swaps_in_as_zeroed_anon() {
        let mut alloc: FreeListAllocator<4> = FreeListAllocator::new();
        let mut swap = SwapTable::init(Box::new(MemDisk::new(16)));
        let mut mmu = FakeMmu::new();
        let kva = alloc.palloc(PalFlags::empty()).unwrap();
        alloc.bytes_mut(kva)[0] = 0xFF;
        let mut page = Page::new(0x1000, true, PageKind::Uninit(Uninit::Anon));
        let mut c = ctx(&mut alloc, &mut swap, &mut mmu);
        assert!(page.swap_in(&mut c, kva));
        assert!(page.kind.is_anon());
        assert_eq!(alloc.bytes_mut(kva)[0], 0);
    }

    #[test]
    fn anon_swap_out_then_swap_in_round_trips() {
        let mut alloc: FreeListAllocator<4> = FreeListAllocator::new();
        let mut swap = SwapTable::init(Box::new(MemDisk::new(16)));
        let mut mmu = FakeMmu::new();
        mmu.install(0x2000, 0, true);
        let kva = alloc.palloc(PalFlags::empty()).unwrap();
        alloc.bytes_mut(kva)[0] = 0x42;
        let mut page = Page::new(0x2000, true, PageKind::Anon { swap_slot: None });
        {
            let mut c = ctx(&mut alloc, &mut swap, &mut mmu);
            assert!(page.swap_out(&mut c, kva));
        }
        assert_eq!(swap.used_count(), 1);
        alloc.bytes_mut(kva)[0] = 0; // simulate the frame being reused
        {
            let mut c = ctx(&mut alloc, &mut swap, &mut mmu);
            assert!(page.swap_in(&mut c, kva));
        }
        assert_eq!(alloc.bytes_mut(kva)[0], 0x42);
        assert_eq!(swap.used_count(), 0);
    }
}
