//! MMU contract (spec.md §6, §9 design note: "dirty-bit and accessed-bit
//! probes require the implementation to talk to the MMU or to model it in a
//! simulator; expose them as a small MMU trait").
//!
//! Installing a hardware page-table entry, walking it, and servicing TLB
//! invalidation are all architecture-specific and outside this crate's
//! scope (spec.md §1 excludes boot/GDT/IDT setup); everything in `vm`
//! drives the MMU exclusively through this trait.

pub type UserVa = usize;
pub type KernelVa = usize;

pub trait Mmu {
    /// Installs a user mapping `va -> kva` with the given writability.
    /// Returns `false` if a page-table page could not be allocated.
    fn install(&mut self, va: UserVa, kva: KernelVa, writable: bool) -> bool;

    /// Removes whatever mapping exists at `va`, if any.
    fn clear(&mut self, va: UserVa);

    fn is_present(&self, va: UserVa) -> bool;
    fn is_writable(&self, va: UserVa) -> bool;

    fn is_accessed(&self, va: UserVa) -> bool;
    fn set_accessed(&mut self, va: UserVa, value: bool);

    fn is_dirty(&self, va: UserVa) -> bool;
    fn set_dirty(&mut self, va: UserVa, value: bool);

    /// Kernel VA currently mapped at `va`, if present.
    fn translate(&self, va: UserVa) -> Option<KernelVa>;
}

#[cfg(test)]
pub mod fake {
    //! A software model of a page table for host-side tests: a hash map
    //! from user VA to entry, with accessed/dirty bits tracked explicitly
    //! rather than read off real hardware.

    use super::*;
    use hashbrown::HashMap;

    #[derive(Clone, Copy, Debug)]
    struct Entry {
        kva: KernelVa,
        writable: bool,
        accessed: bool,
        dirty: bool,
    }

    #[derive(Default)]
    pub struct FakeMmu {
        entries: HashMap<UserVa, Entry>,
    }

    impl FakeMmu {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Mmu for FakeMmu {
        fn install(&mut self, va: UserVa, kva: KernelVa, writable: bool) -> bool {
            self.entries.insert(
                va,
                Entry {
                    kva,
                    writable,
                    accessed: false,
                    dirty: false,
                },
            );
            true
        }

        fn clear(&mut self, va: UserVa) {
            self.entries.remove(&va);
        }

        fn is_present(&self, va: UserVa) -> bool {
            self.entries.contains_key(&va)
        }

        fn is_writable(&self, va: UserVa) -> bool {
            self.entries.get(&va).map_or(false, |e| e.writable)
        }

        fn is_accessed(&self, va: UserVa) -> bool {
            self.entries.get(&va).map_or(false, |e| e.accessed)
        }

        fn set_accessed(&mut self, va: UserVa, value: bool) {
            if let Some(e) = self.entries.get_mut(&va) {
                e.accessed = value;
            }
        }

        fn is_dirty(&self, va: UserVa) -> bool {
            self.entries.get(&va).map_or(false, |e| e.dirty)
        }

        fn set_dirty(&mut self, va: UserVa, value: bool) {
            if let Some(e) = self.entries.get_mut(&va) {
                e.dirty = value;
            }
        }

        fn translate(&self, va: UserVa) -> Option<KernelVa> {
            self.entries.get(&va).map(|e| e.kva)
        }
    }

    #[test]
    fn install_then_translate() {
        let mut mmu = FakeMmu::new();
        assert!(mmu.install(0x1000, 0xC000, true));
        assert_eq!(mmu.translate(0x1000), Some(0xC000));
        assert!(mmu.is_writable(0x1000));
        assert!(!mmu.is_accessed(0x1000));
    }

    #[test]
    fn clear_removes_mapping() {
        let mut mmu = FakeMmu::new();
        mmu.install(0x2000, 0xD000, false);
        mmu.clear(0x2000);
        assert!(!mmu.is_present(0x2000));
    }
}
