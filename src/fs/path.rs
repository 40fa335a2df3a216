//! Bounded symlink resolution (spec.md §9 Open Question: "A broken
//! symlink-resolution loop in `parse_path` is commented out in one variant;
//! implement symlink resolution with a bounded follow count (e.g., 8) and
//! surface a loop error.").
//!
//! Directory path parsing and filename syntax themselves are out of scope
//! (spec.md §1); this module only fixes the one piece of path handling the
//! VM/FS core needs a real answer for: given a starting inode sector that
//! might be a symlink, follow it to a concrete (non-symlink) sector,
//! bounded by `MAX_SYMLINK_FOLLOW`.

use crate::bio::BlockDevice;
use crate::fs::fat::Fat;
use crate::fs::inode::InodeTable;
use crate::param::MAX_SYMLINK_FOLLOW;
use crate::{Error, Result};

/// Resolves `start_sector` to a non-symlink inode sector, following
/// `resolve_target` (the caller's directory-lookup hook, since directory
/// parsing itself is out of scope here) up to `MAX_SYMLINK_FOLLOW` times.
///
/// Returns `Err(Error::SymlinkLoop)` if the chain is still a symlink after
/// the bound, and `Err(Error::NotFound)` if a target string doesn't resolve
/// to any sector.
pub fn resolve_symlinks(
    inodes: &InodeTable,
    device: &mut dyn BlockDevice,
    fat: &mut Fat,
    mut sector: u32,
    resolve_target: impl Fn(&str) -> Option<u32>,
) -> Result<u32> {
    for _ in 0..MAX_SYMLINK_FOLLOW {
        let inode = inodes.open(device, sector);
        let (is_symlink, target_sector) = {
            let guard = inode.lock();
            if !guard.is_symlink() {
                (false, None)
            } else {
                (true, resolve_target(guard.symlink_target()))
            }
        };
        inodes.close(device, fat, &inode);
        if !is_symlink {
            return Ok(sector);
        }
        sector = target_sector.ok_or(Error::NotFound)?;
    }
    Err(Error::SymlinkLoop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::MemDisk;
    use crate::fs::inode::InodeTable;
    use alloc::collections::BTreeMap;

    fn fixture(clusters: u32) -> (MemDisk, Fat) {
        let mut disk = MemDisk::new(4 + clusters);
        let fat = Fat::mount(&mut disk, 0, clusters, 4, 2);
        (disk, fat)
    }

    #[test]
    fn non_symlink_resolves_to_itself() {
        let (mut disk, mut fat) = fixture(4);
        let table = InodeTable::new();
        table.create(&mut disk, &mut fat, 20, 0, false).unwrap();
        let resolved =
            resolve_symlinks(&table, &mut disk, &mut fat, 20, |_| None).unwrap();
        assert_eq!(resolved, 20);
    }

    #[test]
    fn follows_a_single_symlink_hop() {
        let (mut disk, mut fat) = fixture(4);
        let table = InodeTable::new();
        table.create(&mut disk, &mut fat, 20, 0, false).unwrap();
        table.create_symlink(&mut disk, 24, "target");
        let mut names = BTreeMap::new();
        names.insert("target", 20u32);
        let resolved = resolve_symlinks(&table, &mut disk, &mut fat, 24, |name| {
            names.get(name).copied()
        })
        .unwrap();
        assert_eq!(resolved, 20);
    }

    #[test]
    fn a_symlink_cycle_is_reported_as_a_loop() {
        let (mut disk, mut fat) = fixture(4);
        let table = InodeTable::new();
        table.create_symlink(&mut disk, 20, "b");
        table.create_symlink(&mut disk, 24, "a");
        let mut names = BTreeMap::new();
        names.insert("a", 20u32);
        names.insert("b", 24u32);
        let err = resolve_symlinks(&table, &mut disk, &mut fat, 20, |name| {
            names.get(name).copied()
        })
        .unwrap_err();
        assert_eq!(err, Error::SymlinkLoop);
    }
}
