//! Supplemental page table (spec.md §4.6, C6): a per-process hash map from
//! page-aligned user VA to page descriptor.
//!
//! Grounded on `original_source/vm/vm.c`'s `spt_find_page`/`spt_insert_page`/
//! `spt_delete_page` trio (a `struct hash` keyed by VA), ported onto
//! `hashbrown::HashMap` per this crate's ambient stack rather than hand-
//! rolling a hash table, and its `supplemental_page_table_copy` (the
//! fork/COW path, spec.md §4.6/§4.9).

use alloc::boxed::Box as AllocBox;
use alloc::sync::Arc;

use hashbrown::HashMap;
use spin::Mutex;

use crate::kalloc::PalFlags;
use crate::mmu::{Mmu, UserVa};
use crate::param::{page_round_down as round_down, PGSIZE};
use crate::vm::frame::{CurrentSpace, FrameTable};
use crate::vm::page::{Page, PageKind, Uninit};
use crate::vm::swap::SwapTable;
use crate::vm::{AddressSpace, PageIoCtx};
use crate::{Error, Result};

/// Per-process map from VA to page descriptor (spec.md §3: "a process owns
/// its SPT for its lifetime; killed on exit").
#[derive(Default)]
pub struct SupplementalPageTable {
    pages: HashMap<UserVa, Page>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rounds `va` down to its page boundary before lookup (spec.md §4.6).
    pub fn find(&self, va: UserVa) -> Option<&Page> {
        self.pages.get(&round_down(va))
    }

    pub fn find_mut(&mut self, va: UserVa) -> Option<&mut Page> {
        self.pages.get_mut(&round_down(va))
    }

    /// Inserts `page`. `Err(Error::AlreadyExists)` on a duplicate VA
    /// (spec.md §4.6: "insert(page) -> bool (false on duplicate)").
    pub fn insert(&mut self, page: Page) -> Result<()> {
        let va = round_down(page.va);
        if self.pages.contains_key(&va) {
            return Err(Error::AlreadyExists);
        }
        self.pages.insert(va, page);
        Ok(())
    }

    /// Removes and returns the page at `va`, if any.
    pub fn delete(&mut self, va: UserVa) -> Option<Page> {
        self.pages.remove(&round_down(va))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserVa, &Page)> {
        self.pages.iter()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Tears down every page (spec.md §4.6: "kill(spt) (iterates all pages;
    /// for file-backed, runs unmap logic; then destroys each descriptor)").
    ///
    /// The file-backed unmap step is left to the caller (`vm::mmap::munmap`
    /// already does the dirty write-back + removal in one pass); by the
    /// time `kill` runs over what's left, every remaining page's `destroy`
    /// is a plain type-specific resource release.
    pub fn kill(&mut self, ctx: &mut PageIoCtx<'_>) {
        for (_, mut page) in self.pages.drain() {
            page.destroy(ctx);
        }
    }
}

/// Fork's SPT duplication (spec.md §4.6 `copy`, §4.9): iterates `src`,
/// handling each page type per spec.md's three-way split.
///
/// `frames`/`swap` are the process-wide singletons (one physical pool
/// shared by every address space, spec.md §9: "model as a process-wide
/// `FsState`/frame table... pass a handle explicitly"). `src_mmu` is the
/// *parent's* page table, needed to downgrade its mapping to read-only
/// alongside the child's when a frame becomes COW-shared.
///
/// Spec.md §4.9: "Decrement the shared frame's refcount; if it reaches 1
/// in the sibling, leave it as is." Both sides are registered as owners
/// here (`FrameTable::add_owner`, alongside `share`'s refcount bump), and
/// `break_cow` drops its own entry when it moves away, so the frame's
/// owner list always matches whoever is actually still mapping it — see
/// DESIGN.md C6/C9.
pub fn copy(
    dst_space: &Arc<Mutex<AddressSpace>>,
    src: &SupplementalPageTable,
    src_mmu: &mut dyn Mmu,
    frames: &mut FrameTable,
    swap: &mut SwapTable,
) -> Result<()> {
    let mut dst = dst_space.lock();
    for (&va, page) in src.pages.iter() {
        match &page.kind {
            PageKind::Uninit(Uninit::Anon) => {
                dst.spt
                    .insert(Page::new(va, page.writable, PageKind::Uninit(Uninit::Anon)))?;
            }
            PageKind::Uninit(Uninit::File {
                handle,
                offset,
                read_bytes,
            }) => {
                dst.spt.insert(Page::new(
                    va,
                    page.writable,
                    PageKind::Uninit(Uninit::File {
                        handle: handle.clone(),
                        offset: *offset,
                        read_bytes: *read_bytes,
                    }),
                ))?;
            }
            PageKind::File {
                handle,
                offset,
                read_bytes,
            } => {
                // Fresh uninit->file page, claimed immediately so the child
                // gets its own frame; then overwritten with the parent's
                // current bytes so an mmap write that hasn't been flushed
                // back to disk yet is still visible to the child.
                let idx = frames
                    .get_frame(PalFlags::USER, swap, Some(CurrentSpace { arc: dst_space, guard: &mut *dst }))
                    .ok_or(Error::NoSpace)?;
                let kva = frames.kva(idx);
                let mut child = Page::new(
                    va,
                    page.writable,
                    PageKind::File {
                        handle: handle.clone(),
                        offset: *offset,
                        read_bytes: *read_bytes,
                    },
                );
                {
                    let mut ctx = PageIoCtx {
                        allocator: frames.allocator_mut(),
                        swap,
                        mmu: &mut *dst.mmu,
                    };
                    child.swap_in(&mut ctx, kva);
                }
                if let Some(parent_idx) = page.frame {
                    let parent_bytes = *frames.bytes_mut(parent_idx);
                    *frames.bytes_mut(idx) = parent_bytes;
                }
                child.frame = Some(idx);
                dst.mmu.install(va, kva, page.writable);
                frames.set_owner(
                    idx,
                    crate::vm::frame::FrameOwner {
                        space: Arc::downgrade(dst_space),
                        va,
                    },
                );
                // Guards against leaking `idx` if the insert below fails;
                // defused once the child page is safely in `dst`'s SPT
                // (mirrors the teacher kernel's `scopeguard::guard` rollback
                // around `uvmcopy`'s partial-failure cleanup).
                let frame_guard = scopeguard::guard(idx, |idx| frames.release(idx));
                dst.spt.insert(child)?;
                scopeguard::ScopeGuard::into_inner(frame_guard);
            }
            PageKind::Anon { swap_slot } => match (page.frame, swap_slot) {
                (Some(frame), _) => {
                    // Copy-on-write: share the frame, force both mappings
                    // read-only regardless of the page's true writability
                    // (recorded in the descriptor for the COW fault
                    // handler to consult, spec.md §4.6/§4.9).
                    frames.share(frame);
                    frames.add_owner(
                        frame,
                        crate::vm::frame::FrameOwner {
                            space: Arc::downgrade(dst_space),
                            va,
                        },
                    );
                    let kva = frames.kva(frame);
                    dst.mmu.install(va, kva, false);
                    src_mmu.install(va, kva, false);
                    let mut child = Page::new(va, page.writable, PageKind::Anon { swap_slot: None });
                    child.frame = Some(frame);
                    dst.spt.insert(child)?;
                }
                (None, Some(slot)) => {
                    // Swapped out: a slot can't be shared (spec.md §3:
                    // "no slot is double-booked"), so the child gets its
                    // own copy of the swapped data instead of sharing.
                    let mut scratch = AllocBox::new([0u8; PGSIZE]);
                    let new_slot = swap.duplicate(*slot, &mut scratch).ok_or(Error::NoSpace)?;
                    dst.spt.insert(Page::new(
                        va,
                        page.writable,
                        PageKind::Anon {
                            swap_slot: Some(new_slot),
                        },
                    ))?;
                }
                (None, None) => {
                    dst.spt
                        .insert(Page::new(va, page.writable, PageKind::Anon { swap_slot: None }))?;
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::page::PageKind;

    fn page(va: usize) -> Page {
        Page::new(va, true, PageKind::Anon { swap_slot: None })
    }

    #[test]
    fn insert_then_find_round_trips() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(page(0x1000)).unwrap();
        assert!(spt.find(0x1000).is_some());
        assert!(spt.find(0x1000 + 4).is_some(), "find rounds down to the page boundary");
    }

    #[test]
    fn insert_duplicate_fails() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(page(0x1000)).unwrap();
        assert_eq!(spt.insert(page(0x1000)).unwrap_err(), Error::AlreadyExists);
    }

    #[test]
    fn delete_removes_the_page() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(page(0x1000)).unwrap();
        assert!(spt.delete(0x1000).is_some());
        assert!(spt.find(0x1000).is_none());
    }

    #[test]
    fn copy_shares_resident_anon_frames_cow() {
        use crate::bio::MemDisk;
        use crate::kalloc::{FreeListAllocator, PalFlags};
        use crate::mmu::fake::FakeMmu;
        use crate::vm::AddressSpace;
        use alloc::boxed::Box;

        let mut frames: FrameTable = FrameTable::new(Box::new(FreeListAllocator::<4>::new()));
        let mut swap = SwapTable::init(Box::new(MemDisk::new(64)));

        let mut parent = AddressSpace::new(Box::new(FakeMmu::new()));
        let idx = frames.get_frame(PalFlags::ZERO, &mut swap, None).unwrap();
        let kva = frames.kva(idx);
        parent.mmu.install(0x1000, kva, true);
        let mut parent_page = Page::new(0x1000, true, PageKind::Anon { swap_slot: None });
        parent_page.frame = Some(idx);
        parent.spt.insert(parent_page).unwrap();

        let child_space = Arc::new(Mutex::new(AddressSpace::new(Box::new(FakeMmu::new()))));
        copy(&child_space, &parent.spt, &mut *parent.mmu, &mut frames, &mut swap).unwrap();

        assert_eq!(frames.refcount(idx), 2);
        assert!(!parent.mmu.is_writable(0x1000), "parent mapping downgraded to read-only");
        let child = child_space.lock();
        assert!(!child.mmu.is_writable(0x1000));
        assert_eq!(child.spt.find(0x1000).unwrap().frame, Some(idx));
    }
}
