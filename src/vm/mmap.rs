//! mmap / munmap (spec.md §4.8, C8).
//!
//! Grounded on `original_source/userprog/syscall.c`'s `mmap`/`munmap`
//! argument checks (fd not stdin/stdout, `addr` page-aligned and non-null,
//! `length > 0`), plus the overflow check the distilled spec omits but the
//! source enforces (`addr + length` must stay within user space).

use alloc::sync::Arc;

use spin::Mutex;

use crate::fs::FileHandle;
use crate::mmu::{Mmu, UserVa};
use crate::param::{page_round_up, KERNEL_BASE, PGSIZE};
use crate::vm::frame::FrameTable;
use crate::vm::page::{Page, PageKind};
use crate::vm::AddressSpace;

/// Reserved file descriptors, matching spec.md §4.8: "`fd` is not
/// stdin/stdout".
pub const STDIN_FD: i32 = 0;
pub const STDOUT_FD: i32 = 1;

/// Installs uninit file-backed pages covering `[addr, addr + length)`,
/// rounded up to whole pages, per spec.md §4.8. Returns the mapping's base
/// address (identical to `addr`) on success.
///
/// `handle` must already be the caller's reopened, independent handle
/// (spec.md step 1: "reopen the file... so later close by the user does
/// not invalidate the mapping") — the caller's fd table owns deciding
/// which open handle backs `fd` and performs the reopen, since this
/// module has no notion of an fd table (spec.md §1 excludes the syscall
/// layer).
pub fn mmap(
    space: &Arc<Mutex<AddressSpace>>,
    addr: UserVa,
    length: usize,
    writable: bool,
    fd: i32,
    offset: u32,
    handle: &FileHandle,
) -> Option<UserVa> {
    if fd == STDIN_FD || fd == STDOUT_FD {
        return None;
    }
    if offset as usize % PGSIZE != 0 || addr % PGSIZE != 0 || addr == 0 || length == 0 {
        return None;
    }
    let end = addr.checked_add(length)?;
    if end > KERNEL_BASE {
        return None;
    }

    let mut guard = space.lock();
    let span = page_round_up(length);
    for i in num_iter::range_step(0, span, PGSIZE) {
        if guard.spt.find(addr + i).is_some() {
            return None;
        }
    }

    let file_length = handle.filesize();
    let read_bytes = core::cmp::min(file_length.saturating_sub(offset), length as u32);
    let total = page_round_up(read_bytes as usize) as u32;

    let mut remaining = read_bytes;
    for i in num_iter::range_step(0u32, total, PGSIZE as u32) {
        let page_read_bytes = core::cmp::min(remaining, PGSIZE as u32);
        remaining -= page_read_bytes;
        let mut page = Page::mmap_uninit(
            addr + i as usize,
            writable,
            handle.reopen(),
            offset + i,
            page_read_bytes,
        );
        // Every page in one mapping shares the mapping's base address as
        // its id, not its own VA, so `munmap` can tell where the region
        // ends (spec.md §4.8: "implementations may tag pages with a
        // mapping id").
        page.mapping_id = Some(addr);
        if guard.spt.insert(page).is_err() {
            // Unwind whatever this call already installed (spec.md §4.8:
            // "any failure returns none, no side effects") rather than
            // leaving a partial mapping and its reopened handles behind.
            for j in num_iter::range_step(0u32, i, PGSIZE as u32) {
                guard.spt.delete(addr + j as usize);
            }
            return None;
        }
    }
    Some(addr)
}

/// Tears down the mapping anchored at `addr` (spec.md §4.8): walks
/// consecutive pages tagged with the same mapping id, writing back dirty
/// file-backed pages, clearing the present bit, and removing each page
/// from the SPT (spec.md: "free the descriptor").
///
/// `frames` is needed to reach a resident page's raw bytes for write-back
/// and to return its frame to the pool, the same access path `FrameTable`
/// already exposes to `vm::frame::evict` for the identical File write-back
/// case.
pub fn munmap(space: &Arc<Mutex<AddressSpace>>, frames: &mut FrameTable, addr: UserVa) {
    let mut guard = space.lock();
    let Some(page) = guard.spt.find(addr) else {
        return;
    };
    let Some(mapping_id) = page.mapping_id else {
        return;
    };

    let mut va = addr;
    loop {
        let belongs = guard.spt.find(va).map_or(false, |p| p.mapping_id == Some(mapping_id));
        if !belongs {
            break;
        }
        write_back_and_release(&mut guard, frames, va);
        guard.spt.delete(va);
        va += PGSIZE;
    }
}

fn write_back_and_release(guard: &mut AddressSpace, frames: &mut FrameTable, va: UserVa) {
    let AddressSpace { mmu, spt } = guard;
    let Some(page) = spt.find(va) else { return };
    let Some(frame_idx) = page.frame else {
        mmu.clear(va);
        return;
    };
    if let PageKind::File { handle, offset, read_bytes } = &page.kind {
        if mmu.is_dirty(va) {
            let bytes = frames.bytes_mut(frame_idx);
            handle.write_at(&bytes[..*read_bytes as usize], *offset);
        }
    }
    mmu.clear(va);
    frames.release(frame_idx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::{BlockDevice, MemDisk};
    use crate::fs::FsState;
    use crate::kalloc::{FreeListAllocator, PalFlags};
    use crate::mmu::fake::FakeMmu;
    use crate::vm::fault::claim;
    use crate::vm::swap::SwapTable;
    use alloc::boxed::Box;

    fn fs() -> Arc<FsState> {
        let disk: Box<dyn BlockDevice + Send> = Box::new(MemDisk::new(4 + 8));
        FsState::mount(disk, 0, 8, 4, 2)
    }

    fn space() -> Arc<Mutex<AddressSpace>> {
        Arc::new(Mutex::new(AddressSpace::new(Box::new(FakeMmu::new()))))
    }

    #[test]
    fn mmap_installs_one_page_per_read_chunk() {
        let fs = fs();
        fs.create_file(20, 0, false).unwrap();
        let handle = fs.open(20);
        handle.write(&[0x5Au8; 10]);

        let space = space();
        let addr = mmap(&space, 0x1000, PGSIZE, true, 3, 0, &handle).unwrap();
        assert_eq!(addr, 0x1000);
        let guard = space.lock();
        assert!(guard.spt.find(0x1000).is_some());
        assert_eq!(guard.spt.len(), 1);
    }

    #[test]
    fn mmap_rejects_stdio_fds_and_misaligned_addr() {
        let fs = fs();
        fs.create_file(20, 0, false).unwrap();
        let handle = fs.open(20);
        let space = space();
        assert!(mmap(&space, 0x1000, PGSIZE, true, STDIN_FD, 0, &handle).is_none());
        assert!(mmap(&space, 0x1001, PGSIZE, true, 3, 0, &handle).is_none());
        assert!(mmap(&space, 0, PGSIZE, true, 3, 0, &handle).is_none());
    }

    #[test]
    fn mmap_rejects_overlapping_existing_mapping() {
        let fs = fs();
        fs.create_file(20, 0, false).unwrap();
        let handle = fs.open(20);
        let space = space();
        mmap(&space, 0x1000, PGSIZE, true, 3, 0, &handle).unwrap();
        assert!(mmap(&space, 0x1000, PGSIZE, true, 3, 0, &handle).is_none());
    }

    #[test]
    fn munmap_writes_back_dirty_page_and_clears_spt() {
        let fs = fs();
        fs.create_file(20, PGSIZE as u32, false).unwrap();
        let handle = fs.open(20);

        let space = space();
        mmap(&space, 0x1000, PGSIZE, true, 3, 0, &handle).unwrap();

        let mut frames: FrameTable = FrameTable::new(Box::new(FreeListAllocator::<4>::new()));
        let mut swap = SwapTable::init(Box::new(MemDisk::new(64)));
        {
            let mut guard = space.lock();
            assert!(claim(&space, &mut guard, &mut frames, &mut swap, 0x1000));
            guard.mmu.set_dirty(0x1000, true);
            let frame_idx = guard.spt.find(0x1000).unwrap().frame.unwrap();
            frames.bytes_mut(frame_idx)[0] = 0x99;
        }

        munmap(&space, &mut frames, 0x1000);

        let mut buf = [0u8; 1];
        handle.read_at(&mut buf, 0);
        assert_eq!(buf[0], 0x99);
        let guard = space.lock();
        assert!(guard.spt.find(0x1000).is_none());
        assert!(!guard.mmu.is_present(0x1000));
    }
}
