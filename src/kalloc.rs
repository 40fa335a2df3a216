//! Physical page allocator contract.
//!
//! spec.md §1 treats the kernel heap/page allocator as an external
//! collaborator ("a page allocator yielding fixed-size frames and a general
//! allocator for small metadata"); this module fixes only the contract the
//! VM core needs from it (spec.md §6, "Page allocator"), plus a reference
//! free-list implementation in the teacher kernel's `Kmem` style for tests
//! and for a real kernel to use as-is.

use core::ops::{Deref, DerefMut};

use crate::param::PGSIZE;

bitflags::bitflags! {
    /// Mirrors Pintos' `PAL_*` flags (spec.md §6).
    pub struct PalFlags: u32 {
        /// Allocate from the user pool rather than the kernel pool.
        const USER = 1 << 0;
        /// Zero the page before returning it.
        const ZERO = 1 << 1;
    }
}

/// One physical page's worth of bytes, page-aligned.
#[repr(align(4096))]
pub struct RawPage {
    bytes: [u8; PGSIZE],
}

impl Deref for RawPage {
    type Target = [u8; PGSIZE];
    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl DerefMut for RawPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes
    }
}

/// A physical page allocator. Implementations own a fixed pool of pages;
/// `palloc`/`palloc_free` name the contract from spec.md §6.
///
/// The returned handle doubles as the page's kernel VA (`mmu::KernelVa`):
/// real allocators hand out an actual kernel-mapped address, and the fake
/// allocator used in tests hands out an arena index that the fake MMU
/// treats the same way. This keeps `vm::frame` from needing a second,
/// parallel handle type.
pub trait PageAllocator {
    /// Returns a fresh page, or `None` if the pool is exhausted. Honors
    /// `PalFlags::ZERO`.
    fn palloc(&mut self, flags: PalFlags) -> Option<usize>;

    /// Returns `handle` to the free pool. `handle` must have come from
    /// `palloc` on the same allocator and not have been freed already.
    fn palloc_free(&mut self, handle: usize);

    /// Kernel-visible bytes backing `handle`, for page-in/page-out copies.
    fn bytes_mut(&mut self, handle: usize) -> &mut [u8; PGSIZE];
}

/// A simple free-list allocator over a fixed, statically sized arena, in the
/// shape of the teacher kernel's `Kmem` (a singly linked list of free runs),
/// generalized to an arena owned by the struct instead of a `static`.
pub struct FreeListAllocator<const N: usize> {
    pages: alloc::boxed::Box<[RawPage; N]>,
    free: arrayvec::ArrayVec<usize, N>,
}

impl<const N: usize> FreeListAllocator<N> {
    pub fn new() -> Self {
        let pages = alloc::boxed::Box::new([const { RawPage { bytes: [0; PGSIZE] } }; N]);
        let mut free = arrayvec::ArrayVec::new();
        for i in (0..N).rev() {
            free.push(i);
        }
        Self { pages, free }
    }
}

impl<const N: usize> Default for FreeListAllocator<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PageAllocator for FreeListAllocator<N> {
    fn palloc(&mut self, flags: PalFlags) -> Option<usize> {
        let idx = self.free.pop()?;
        if flags.contains(PalFlags::ZERO) {
            self.pages[idx].bytes = [0; PGSIZE];
        }
        Some(idx)
    }

    fn palloc_free(&mut self, handle: usize) {
        debug_assert!(!self.free.contains(&handle), "double free of frame {handle}");
        self.free.push(handle);
    }

    fn bytes_mut(&mut self, handle: usize) -> &mut [u8; PGSIZE] {
        &mut self.pages[handle].bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_is_reusable() {
        let mut a: FreeListAllocator<4> = FreeListAllocator::new();
        let h1 = a.palloc(PalFlags::empty()).unwrap();
        let h2 = a.palloc(PalFlags::empty()).unwrap();
        assert_ne!(h1, h2);
        a.palloc_free(h1);
        let h3 = a.palloc(PalFlags::empty()).unwrap();
        assert_eq!(h1, h3);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut a: FreeListAllocator<2> = FreeListAllocator::new();
        assert!(a.palloc(PalFlags::empty()).is_some());
        assert!(a.palloc(PalFlags::empty()).is_some());
        assert!(a.palloc(PalFlags::empty()).is_none());
    }

    #[test]
    fn zero_flag_clears_page() {
        let mut a: FreeListAllocator<2> = FreeListAllocator::new();
        let h = a.palloc(PalFlags::empty()).unwrap();
        a.bytes_mut(h)[0] = 0xAA;
        a.palloc_free(h);
        let h2 = a.palloc(PalFlags::ZERO).unwrap();
        assert_eq!(a.bytes_mut(h2)[0], 0);
    }
}
