//! Cluster allocator (spec.md §4.1, C1): a flat array mapping each cluster
//! to its successor, persisted to a reserved on-disk region at mount/close.
//!
//! Grounded on the teacher kernel's block-bitmap allocator (`fs/mod.rs`'s
//! `balloc`/`bfree`, walking a bitmap region one block at a time) but
//! reworked into a FAT, per spec.md's data model: a flat successor table
//! rather than a bitmap, since chains (not just occupancy) must be
//! recorded.

use alloc::vec;
use alloc::vec::Vec;

use crate::bio::BlockDevice;
use crate::param::{EOC, FREE_CLUSTER};

/// In-memory FAT, read at mount and written back at `close` (spec.md §4.1:
/// "There is no incremental journaling; a crash between closes may lose
/// recent allocations").
pub struct Fat {
    /// Indexed directly by cluster id. Entries below `first_data_cluster`
    /// are a permanently reserved prefix (cluster `0` is the spec's own
    /// "free sentinel", never a valid id; lower ids below the data area are
    /// spoken for by metadata outside this allocator's scope, e.g. the root
    /// directory) and are pinned to `EOC` so `find_free` can never hand them
    /// out — cluster ids stay nonzero per spec.md §3.
    table: Vec<u32>,
    /// First cluster of the data area; cluster ids and FAT-table indices
    /// coincide 1:1 in this layout, so only this one offset is needed to
    /// convert to/from sector numbers (spec.md Open Question resolution).
    data_area_base_sector: u32,
    first_data_cluster: u32,
}

impl Fat {
    /// Reads the FAT from its reserved region. `cluster_count` is the
    /// number of allocatable data clusters; the table itself is sized
    /// `first_data_cluster + cluster_count` so cluster ids line up with
    /// `sector_of`/`cluster_of`'s `first_data_cluster`-relative arithmetic,
    /// with every id below `first_data_cluster` pinned non-free.
    pub fn mount(
        device: &mut dyn BlockDevice,
        fat_start_sector: u32,
        cluster_count: u32,
        data_area_base_sector: u32,
        first_data_cluster: u32,
    ) -> Self {
        let total = first_data_cluster as usize + cluster_count as usize;
        let mut table = vec![FREE_CLUSTER; total];
        let entries_per_sector = crate::param::SECTOR_SIZE / 4;
        for (i, entry) in table.iter_mut().enumerate() {
            let sector = fat_start_sector + (i / entries_per_sector) as u32;
            let offset = (i % entries_per_sector) * 4;
            let mut buf = [0u8; crate::param::SECTOR_SIZE];
            device.read(sector, &mut buf);
            *entry = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        }
        for entry in table.iter_mut().take(first_data_cluster as usize) {
            *entry = EOC;
        }
        Self {
            table,
            data_area_base_sector,
            first_data_cluster,
        }
    }

    /// Writes the FAT back to its reserved region (spec.md §4.1: "written
    /// back on close").
    pub fn sync(&self, device: &mut dyn BlockDevice, fat_start_sector: u32) {
        let entries_per_sector = crate::param::SECTOR_SIZE / 4;
        for chunk_idx in 0..(self.table.len() + entries_per_sector - 1) / entries_per_sector {
            let mut buf = [0u8; crate::param::SECTOR_SIZE];
            for j in 0..entries_per_sector {
                let idx = chunk_idx * entries_per_sector + j;
                if idx >= self.table.len() {
                    break;
                }
                buf[j * 4..j * 4 + 4].copy_from_slice(&self.table[idx].to_le_bytes());
            }
            device.write(fat_start_sector + chunk_idx as u32, &buf);
        }
    }

    pub fn get(&self, cluster: u32) -> u32 {
        self.table[cluster as usize]
    }

    /// Scans only the allocatable range (cluster ids `>= first_data_cluster`)
    /// so the reserved low ids, cluster `0` above all, are never handed out.
    fn find_free(&self) -> Option<u32> {
        self.table
            .iter()
            .enumerate()
            .skip(self.first_data_cluster as usize)
            .find(|&(_, &c)| c == FREE_CLUSTER)
            .map(|(i, _)| i as u32)
    }

    /// Allocates one free cluster, appending it to the chain headed by (or
    /// continuing from) `predecessor`. `predecessor == 0` starts a new
    /// chain. Returns `0` when no free cluster exists; the caller must
    /// unwind any partial chain it had already built (spec.md §4.1).
    pub fn create_chain(&mut self, predecessor: u32) -> u32 {
        let Some(new) = self.find_free() else {
            return 0;
        };
        self.table[new as usize] = EOC;
        if predecessor != FREE_CLUSTER {
            self.table[predecessor as usize] = new;
        }
        new
    }

    /// Walks from `head` following the FAT, freeing every visited cluster.
    /// If `preceding != 0`, that cluster's successor is set to `EOC` first,
    /// detaching the freed tail from the surviving chain.
    pub fn remove_chain(&mut self, head: u32, preceding: u32) {
        if preceding != FREE_CLUSTER {
            self.table[preceding as usize] = EOC;
        }
        let mut cur = head;
        while cur != FREE_CLUSTER && cur != EOC {
            let next = self.table[cur as usize];
            self.table[cur as usize] = FREE_CLUSTER;
            cur = next;
        }
    }

    pub fn sector_of(&self, cluster: u32) -> u32 {
        self.data_area_base_sector
            + (cluster - self.first_data_cluster) * crate::param::SECTORS_PER_CLUSTER
    }

    /// Resolves the Open Question's broken `sector_to_cluster` variant: the
    /// correct arithmetic form, `(sector - base) / SECTORS_PER_CLUSTER +
    /// first_data_cluster`.
    pub fn cluster_of(&self, sector: u32) -> u32 {
        (sector - self.data_area_base_sector) / crate::param::SECTORS_PER_CLUSTER
            + self.first_data_cluster
    }

    pub fn free_count(&self) -> usize {
        self.table[self.first_data_cluster as usize..]
            .iter()
            .filter(|&&c| c == FREE_CLUSTER)
            .count()
    }
}
