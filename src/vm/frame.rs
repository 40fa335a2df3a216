//! Frame table and clock eviction (spec.md §4.4, C4).
//!
//! Grounded on the teacher kernel's page-pool machinery in `kalloc.rs`
//! (free-list over a static arena), extended with the clock sweep spec.md
//! describes. The pointer-linked circular list from the original becomes a
//! flat `Vec<Frame>` plus a rotating index, per design note §9 ("pointer-
//! linked hash-of-pages and frame list map to owned descriptors in an
//! arena"); a frame's back-pointer to its owning page is a `Weak` handle
//! (the owning address space, plus the VA to look the page up by) rather
//! than a raw pointer, avoiding a reference cycle between frame and page.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::kalloc::{PageAllocator, PalFlags};
use crate::mmu::UserVa;
use crate::param::PGSIZE;
use crate::vm::page::PageIoCtx;
use crate::vm::swap::SwapTable;
use crate::vm::AddressSpace;

/// Identifies the page a frame currently backs, without the frame owning
/// that page directly: `space.upgrade()` fails once the owning process has
/// exited, at which point the frame is free to reclaim outright.
#[derive(Clone)]
pub struct FrameOwner {
    pub space: Weak<Mutex<AddressSpace>>,
    pub va: UserVa,
}

struct Frame {
    kva: usize,
    /// Every live sharer of this frame, not just the first (spec.md §4.9):
    /// a COW-shared frame has one entry per process still mapping it, so
    /// that when one side breaks away (`break_cow` removes its own entry)
    /// eviction still resolves the frame against whichever side is left.
    owners: Vec<FrameOwner>,
    /// 1 for an exclusively owned frame; >1 while COW-shared (spec.md §4.9).
    refcount: u32,
}

/// The caller's already-locked address space, threaded into `get_frame`/
/// `evict` so a victim frame owned by this same process is resolved
/// against the guard already held instead of calling `.lock()` again.
/// `spin::Mutex` isn't reentrant, so re-locking a space the caller already
/// holds deadlocks outright — and the victim landing in the faulting
/// process's own address space is the common case under memory pressure,
/// not a corner case (spec.md §8 "swap thrash").
pub struct CurrentSpace<'a> {
    pub arc: &'a Arc<Mutex<AddressSpace>>,
    pub guard: &'a mut AddressSpace,
}

/// Outcome of attempting to evict a single clock-hand candidate.
enum EvictStep {
    /// Accessed bit was set (and has now been cleared); try the next
    /// candidate on a later sweep.
    Accessed,
    /// Swap-out failed (device full); the whole eviction attempt fails.
    Failed,
    /// Victim selected and written out (or had nothing to write back).
    Evicted,
}

/// Owns the physical frame pool and the clock hand (spec.md §4.4: "a hand
/// `clock_ref` points to the next candidate").
pub struct FrameTable {
    allocator: Box<dyn PageAllocator + Send>,
    frames: Vec<Frame>,
    free_slots: Vec<usize>,
    clock_hand: usize,
}

impl FrameTable {
    pub fn new(allocator: Box<dyn PageAllocator + Send>) -> Self {
        Self {
            allocator,
            frames: Vec::new(),
            free_slots: Vec::new(),
            clock_hand: 0,
        }
    }

    pub fn kva(&self, idx: usize) -> usize {
        self.frames[idx].kva
    }

    pub fn bytes_mut(&mut self, idx: usize) -> &mut [u8; PGSIZE] {
        let kva = self.frames[idx].kva;
        self.allocator.bytes_mut(kva)
    }

    /// Exposes the underlying page allocator for building a `PageIoCtx`
    /// outside of `evict` (fork's `vm::spt::copy` and the fault handler's
    /// `claim` both need one to drive a page's `swap_in`).
    pub fn allocator_mut(&mut self) -> &mut dyn PageAllocator {
        &mut *self.allocator
    }

    /// Sets this frame's sole owner, discarding any previous sharers — used
    /// whenever a frame becomes (or is freshly allocated as) exclusively
    /// held by one process: `claim`'s first fault-in, and `break_cow`'s
    /// freshly copied frame.
    pub fn set_owner(&mut self, idx: usize, owner: FrameOwner) {
        let owners = &mut self.frames[idx].owners;
        owners.clear();
        owners.push(owner);
    }

    /// Registers an additional sharer of a COW-shared frame (spec.md §4.9),
    /// alongside `share`'s refcount bump. Called when fork gives the child
    /// its own mapping onto the parent's frame, so the list always holds
    /// one entry per live sharer.
    pub fn add_owner(&mut self, idx: usize, owner: FrameOwner) {
        self.frames[idx].owners.push(owner);
    }

    /// Drops `space`/`va`'s own entry from a shared frame's owner list —
    /// called by a COW break just before `release`, identifying the side
    /// that is moving to a fresh frame so the old frame's owner list keeps
    /// tracking only whoever is still actually mapping it.
    pub fn remove_owner(&mut self, idx: usize, space: &Weak<Mutex<AddressSpace>>, va: UserVa) {
        self.frames[idx]
            .owners
            .retain(|o| !(Weak::ptr_eq(&o.space, space) && o.va == va));
    }

    pub fn refcount(&self, idx: usize) -> u32 {
        self.frames[idx].refcount
    }

    pub fn share(&mut self, idx: usize) {
        self.frames[idx].refcount += 1;
    }

    /// Drops one reference. Physically frees the frame only once the last
    /// sharer lets go (spec.md §4.9: COW-shared frames are refcounted).
    pub fn release(&mut self, idx: usize) {
        if self.frames[idx].refcount > 1 {
            self.frames[idx].refcount -= 1;
            return;
        }
        let kva = self.frames[idx].kva;
        self.allocator.palloc_free(kva);
        self.frames[idx].owners.clear();
        self.free_slots.push(idx);
    }

    /// spec.md §4.4 `get_frame`: a fresh page if the pool has one, otherwise
    /// an evicted frame. `current` is the calling process's own address
    /// space, already locked by the caller, if any — threaded through to
    /// `evict` so it never re-locks it.
    pub fn get_frame(&mut self, flags: PalFlags, swap: &mut SwapTable, current: Option<CurrentSpace<'_>>) -> Option<usize> {
        if let Some(kva) = self.allocator.palloc(flags) {
            if let Some(idx) = self.free_slots.pop() {
                self.frames[idx] = Frame {
                    kva,
                    owners: Vec::new(),
                    refcount: 1,
                };
                return Some(idx);
            }
            self.frames.push(Frame {
                kva,
                owners: Vec::new(),
                refcount: 1,
            });
            return Some(self.frames.len() - 1);
        }
        self.evict(swap, current)
    }

    /// Attempts to evict `idx` against `guard`, an already-borrowed
    /// `AddressSpace` — either the caller's own (via `CurrentSpace`) or one
    /// freshly locked by `evict` itself, for a different process's frame.
    fn try_evict_with(&mut self, idx: usize, owner: &FrameOwner, swap: &mut SwapTable, guard: &mut AddressSpace) -> EvictStep {
        let was = guard.mmu.is_accessed(owner.va);
        if was {
            guard.mmu.set_accessed(owner.va, false);
            return EvictStep::Accessed;
        }
        let kva = self.frames[idx].kva;
        let AddressSpace { mmu, spt } = guard;
        let evicted = match spt.find_mut(owner.va) {
            Some(page) => {
                let mut ctx = PageIoCtx {
                    allocator: &mut *self.allocator,
                    swap,
                    mmu: &mut **mmu,
                };
                page.swap_out(&mut ctx, kva)
            }
            None => true,
        };
        if evicted {
            EvictStep::Evicted
        } else {
            EvictStep::Failed
        }
    }

    /// spec.md §4.4 `evict`: two clock sweeps guarantee a victim once every
    /// accessed bit has been cleared once. Returns `None` only when every
    /// candidate is COW-pinned or its owner's swap-out itself fails (swap
    /// device full), which the fault handler treats as resource exhaustion.
    ///
    /// `current`, when given, identifies an address space the caller
    /// already holds locked: a victim owned by that same process is
    /// resolved against the supplied guard rather than calling `.lock()` on
    /// it again, since `spin::Mutex` would otherwise deadlock the caller
    /// against itself — the common case under memory pressure, since the
    /// clock hand tends to land on the very process that's faulting.
    pub fn evict(&mut self, swap: &mut SwapTable, mut current: Option<CurrentSpace<'_>>) -> Option<usize> {
        let n = self.frames.len();
        if n == 0 {
            return None;
        }
        for _ in 0..2 * n {
            let idx = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % n;

            if self.frames[idx].refcount > 1 {
                continue;
            }
            let live_owner = self.frames[idx]
                .owners
                .iter()
                .find_map(|o| o.space.upgrade().map(|space| (o.clone(), space)));
            let Some((owner, space_arc)) = live_owner else {
                self.frames[idx].owners.clear();
                return Some(idx);
            };

            let step = match &mut current {
                Some(cur) if Arc::ptr_eq(cur.arc, &space_arc) => self.try_evict_with(idx, &owner, swap, &mut *cur.guard),
                _ => {
                    let mut guard = space_arc.lock();
                    self.try_evict_with(idx, &owner, swap, &mut *guard)
                }
            };

            match step {
                EvictStep::Accessed => continue,
                EvictStep::Failed => return None,
                EvictStep::Evicted => {
                    self.frames[idx].owners.clear();
                    return Some(idx);
                }
            }
        }
        None
    }
}
