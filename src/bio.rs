//! Block device contract and a small buffer cache, generalizing the teacher
//! kernel's `bio.rs` (a `Buf`/`BufEntry` cache backed by `virtio_disk`) to
//! the two raw devices this core addresses (spec.md §6): the filesystem
//! disk and the swap disk.
//!
//! The disk driver and its interrupt completion path are external
//! collaborators (spec.md §1); `BlockDevice` only fixes the synchronous
//! `read`/`write` contract the FAT/inode/swap layers need.

use crate::param::SECTOR_SIZE;

pub type Sector = [u8; SECTOR_SIZE];

/// Fixed-sector block I/O, spec.md §6: `read(sector, buf)` / `write(sector,
/// buf)` with a `DISK_SECTOR_SIZE`-sized buffer. A real implementation waits
/// on the disk ISR internally; that's outside this crate's scope.
pub trait BlockDevice {
    fn read(&mut self, sector: u32, buf: &mut Sector);
    fn write(&mut self, sector: u32, buf: &Sector);

    /// Total sector count, used by swap init to size its bitmap.
    fn sector_count(&self) -> u32;
}

/// An in-memory block device, the reference implementation used by every
/// test in this crate (no QEMU or disk image needed to exercise the FAT,
/// inode, or swap logic). Grounded on the teacher test pack's `FakeMemory`
/// pattern (`betrusted-io-xous-core/loader/src/test.rs`): a plain backing
/// buffer with no persistence across instances.
pub struct MemDisk {
    sectors: alloc::vec::Vec<Sector>,
}

impl MemDisk {
    pub fn new(sector_count: u32) -> Self {
        Self {
            sectors: alloc::vec![[0u8; SECTOR_SIZE]; sector_count as usize],
        }
    }
}

impl BlockDevice for MemDisk {
    fn read(&mut self, sector: u32, buf: &mut Sector) {
        buf.copy_from_slice(&self.sectors[sector as usize]);
    }

    fn write(&mut self, sector: u32, buf: &Sector) {
        self.sectors[sector as usize].copy_from_slice(buf);
    }

    fn sector_count(&self) -> u32 {
        self.sectors.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_after_write_round_trips() {
        let mut disk = MemDisk::new(4);
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0] = 0x42;
        disk.write(2, &buf);
        let mut out = [0u8; SECTOR_SIZE];
        disk.read(2, &mut out);
        assert_eq!(buf, out);
    }

    #[test]
    fn sectors_start_zeroed() {
        let mut disk = MemDisk::new(2);
        let mut out = [0xFFu8; SECTOR_SIZE];
        disk.read(0, &mut out);
        assert_eq!(out, [0u8; SECTOR_SIZE]);
    }
}
