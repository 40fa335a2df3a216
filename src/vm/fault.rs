//! Fault handler and stack growth (spec.md §4.7, C7), plus the
//! write-fault copy-on-write break (spec.md §4.9).
//!
//! Grounded on `original_source/vm/vm.c`'s `vm_try_handle_fault`/
//! `vm_stack_growth`/`vm_handle_wp`, and on `vm_do_claim_page`'s two-phase
//! shape (SPEC_FULL §2): `find` the descriptor, then `do_claim` installs a
//! frame and populates it. The COW write path re-enters only the second
//! half, exactly like the original's `vm_handle_wp`.

use alloc::sync::Arc;

use spin::Mutex;

use crate::kalloc::PalFlags;
use crate::param::{page_round_down, KERNEL_BASE, STACK_HEURISTIC_SLACK, STACK_LIMIT, USER_STACK};
use crate::proc::CurrentThread;
use crate::vm::frame::{CurrentSpace, FrameOwner, FrameTable};
use crate::vm::page::Page;
use crate::vm::swap::SwapTable;
use crate::vm::{AddressSpace, PageIoCtx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    Handled,
    Kill,
}

/// Raw trap-frame inputs (spec.md §4.7): faulting address, write flag, and
/// whether the page-table entry was present at fault time.
#[derive(Debug, Clone, Copy)]
pub struct FaultInfo {
    pub fault_addr: usize,
    pub write: bool,
    pub not_present: bool,
}

/// Entry point from the (external) trap dispatcher. `space` must be the
/// faulting process's own address space, already known by the caller
/// (system-call/trap dispatch owns looking that up; spec.md §1).
pub fn handle_fault(
    space: &Arc<Mutex<AddressSpace>>,
    frames: &mut FrameTable,
    swap: &mut SwapTable,
    thread: &dyn CurrentThread,
    info: FaultInfo,
) -> FaultOutcome {
    if info.fault_addr == 0 || info.fault_addr >= KERNEL_BASE {
        return FaultOutcome::Kill;
    }
    let va = page_round_down(info.fault_addr);

    if info.not_present {
        handle_not_present(space, frames, swap, thread, info.fault_addr, va, info.write)
    } else if info.write {
        if break_cow(space, frames, swap, va) {
            FaultOutcome::Handled
        } else {
            FaultOutcome::Kill
        }
    } else {
        // A present page faulting on a non-write access has no valid
        // explanation in this design; the caller's access is bogus.
        FaultOutcome::Kill
    }
}

fn handle_not_present(
    space: &Arc<Mutex<AddressSpace>>,
    frames: &mut FrameTable,
    swap: &mut SwapTable,
    thread: &dyn CurrentThread,
    fault_addr: usize,
    va: usize,
    write: bool,
) -> FaultOutcome {
    let mut guard = space.lock();

    if guard.spt.find(va).is_none() && is_stack_growth_candidate(fault_addr, thread) {
        if guard.spt.insert(Page::stack(va)).is_err() {
            return FaultOutcome::Kill;
        }
    }

    let Some(page) = guard.spt.find(va) else {
        return FaultOutcome::Kill;
    };
    if write && !page.writable {
        return FaultOutcome::Kill;
    }

    if claim(space, &mut guard, frames, swap, va) {
        FaultOutcome::Handled
    } else {
        FaultOutcome::Kill
    }
}

/// Spec.md §4.7 step 2: within `[sp - 8, USER_STACK]` and no more than
/// `STACK_LIMIT` bytes below `USER_STACK`.
fn is_stack_growth_candidate(fault_addr: usize, thread: &dyn CurrentThread) -> bool {
    if fault_addr > USER_STACK {
        return false;
    }
    let sp = thread.user_stack_pointer();
    let within_slack = fault_addr + STACK_HEURISTIC_SLACK >= sp;
    let within_limit = USER_STACK - fault_addr <= STACK_LIMIT;
    within_slack && within_limit
}

/// `vm_claim_page`: find the descriptor (already done by the caller here),
/// then `do_claim` it — get a frame, install the mapping, and run the
/// page's `swap_in`.
///
/// `space_arc` is needed both to record the frame's `FrameOwner` (a `Weak`
/// back-pointer the clock sweep uses to find this page again, spec.md
/// §4.4/§4.9) and to hand `get_frame` the already-locked guard: `space` is
/// that same address space, so if eviction lands on one of this very
/// process's own frames it must reuse `space` rather than re-lock it.
pub fn claim(
    space_arc: &Arc<Mutex<AddressSpace>>,
    space: &mut AddressSpace,
    frames: &mut FrameTable,
    swap: &mut SwapTable,
    va: usize,
) -> bool {
    let Some(idx) = frames.get_frame(PalFlags::USER, swap, Some(CurrentSpace { arc: space_arc, guard: space })) else {
        return false;
    };
    let kva = frames.kva(idx);
    let writable = match space.spt.find(va) {
        Some(p) => p.writable,
        None => return false,
    };

    let ok = {
        let AddressSpace { mmu, spt } = space;
        let Some(page) = spt.find_mut(va) else {
            return false;
        };
        let mut ctx = PageIoCtx {
            allocator: frames.allocator_mut(),
            swap,
            mmu: &mut **mmu,
        };
        let populated = page.swap_in(&mut ctx, kva);
        if populated {
            page.frame = Some(idx);
        }
        populated
    };
    if !ok {
        return false;
    }
    frames.set_owner(idx, FrameOwner { space: Arc::downgrade(space_arc), va });
    space.mmu.install(va, kva, writable);
    true
}

/// `vm_handle_wp`: break copy-on-write sharing on the first write to a
/// descriptor marked writable but whose page-table entry was installed
/// read-only because its frame is still shared (spec.md §4.9).
fn break_cow(
    space_arc: &Arc<Mutex<AddressSpace>>,
    frames: &mut FrameTable,
    swap: &mut SwapTable,
    va: usize,
) -> bool {
    let mut space = space_arc.lock();
    let (old_idx, writable) = match space.spt.find(va) {
        Some(page) if page.writable => match page.frame {
            Some(idx) => (idx, page.writable),
            None => return false,
        },
        _ => return false,
    };
    if space.mmu.is_writable(va) {
        // Not actually a COW fault: some other permission mismatch.
        return false;
    }

    let Some(new_idx) = frames.get_frame(PalFlags::USER, swap, Some(CurrentSpace { arc: space_arc, guard: &mut *space })) else {
        return false;
    };
    let old_bytes = *frames.bytes_mut(old_idx);
    *frames.bytes_mut(new_idx) = old_bytes;
    let new_kva = frames.kva(new_idx);

    // Spec.md §4.9: this side is breaking away, so drop its own entry from
    // the old frame's owner list before releasing the reference — whatever
    // sibling is left keeps its own entry, so a later eviction of `old_idx`
    // still resolves against a live mapping instead of this one.
    frames.remove_owner(old_idx, &Arc::downgrade(space_arc), va);
    frames.release(old_idx);

    if let Some(page) = space.spt.find_mut(va) {
        page.frame = Some(new_idx);
    }
    frames.set_owner(
        new_idx,
        FrameOwner {
            space: Arc::downgrade(space_arc),
            va,
        },
    );
    space.mmu.install(va, new_kva, writable);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::MemDisk;
    use crate::kalloc::FreeListAllocator;
    use crate::mmu::fake::FakeMmu;
    use crate::proc::FixedThread;
    use crate::vm::page::PageKind;
    use alloc::boxed::Box;

    fn harness() -> (Arc<Mutex<AddressSpace>>, FrameTable, SwapTable) {
        let space = Arc::new(Mutex::new(AddressSpace::new(Box::new(FakeMmu::new()))));
        let frames: FrameTable = FrameTable::new(Box::new(FreeListAllocator::<8>::new()));
        let swap = SwapTable::init(Box::new(MemDisk::new(64)));
        (space, frames, swap)
    }

    #[test]
    fn stack_growth_installs_a_zeroed_writable_page() {
        let (space, mut frames, mut swap) = harness();
        let thread = FixedThread {
            user_sp: USER_STACK - 4096,
            user_mode: true,
        };
        let fault_addr = USER_STACK - 4096 - 4;
        let outcome = handle_fault(
            &space,
            &mut frames,
            &mut swap,
            &thread,
            FaultInfo {
                fault_addr,
                write: true,
                not_present: true,
            },
        );
        assert_eq!(outcome, FaultOutcome::Handled);
        let guard = space.lock();
        assert!(guard.mmu.is_present(page_round_down(fault_addr)));
    }

    #[test]
    fn null_or_kernel_address_kills_the_process() {
        let (space, mut frames, mut swap) = harness();
        let thread = FixedThread {
            user_sp: USER_STACK,
            user_mode: true,
        };
        let outcome = handle_fault(
            &space,
            &mut frames,
            &mut swap,
            &thread,
            FaultInfo {
                fault_addr: 0,
                write: false,
                not_present: true,
            },
        );
        assert_eq!(outcome, FaultOutcome::Kill);
    }

    #[test]
    fn write_to_read_only_page_kills_the_process() {
        let (space, mut frames, mut swap) = harness();
        {
            let mut guard = space.lock();
            guard
                .spt
                .insert(Page::new(0x1000, false, PageKind::Uninit(crate::vm::page::Uninit::Anon)))
                .unwrap();
        }
        let thread = FixedThread {
            user_sp: USER_STACK,
            user_mode: true,
        };
        let outcome = handle_fault(
            &space,
            &mut frames,
            &mut swap,
            &thread,
            FaultInfo {
                fault_addr: 0x1000,
                write: true,
                not_present: true,
            },
        );
        assert_eq!(outcome, FaultOutcome::Kill);
    }

    #[test]
    fn cow_write_fault_breaks_sharing_without_disturbing_the_sibling() {
        let (space, mut frames, mut swap) = harness();
        let idx = frames.get_frame(PalFlags::ZERO, &mut swap, None).unwrap();
        frames.bytes_mut(idx)[0] = 0x11;
        frames.share(idx); // simulate a fork: two owners
        let kva = frames.kva(idx);
        {
            let mut guard = space.lock();
            guard.mmu.install(0x2000, kva, false);
            let mut page = Page::new(0x2000, true, PageKind::Anon { swap_slot: None });
            page.frame = Some(idx);
            guard.spt.insert(page).unwrap();
        }
        let thread = FixedThread {
            user_sp: USER_STACK,
            user_mode: true,
        };
        let outcome = handle_fault(
            &space,
            &mut frames,
            &mut swap,
            &thread,
            FaultInfo {
                fault_addr: 0x2000,
                write: true,
                not_present: false,
            },
        );
        assert_eq!(outcome, FaultOutcome::Handled);
        assert_eq!(frames.refcount(idx), 1, "the shared frame lost one reference");
        let guard = space.lock();
        assert!(guard.mmu.is_writable(0x2000));
        let new_idx = guard.spt.find(0x2000).unwrap().frame.unwrap();
        assert_ne!(new_idx, idx);
    }
}
