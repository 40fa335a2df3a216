//! Compile-time kernel configuration, following the teacher kernel's style
//! of a flat constants module rather than a runtime config file.

/// Bytes per disk sector, matching `DISK_SECTOR_SIZE` on real hardware.
pub const SECTOR_SIZE: usize = 512;

/// Bytes per page, the unit the frame table, SPT, and swap slots all use.
pub const PGSIZE: usize = 4096;

/// Rounds a virtual address down to its containing page's base.
pub const fn page_round_down(va: usize) -> usize {
    va & !(PGSIZE - 1)
}

/// Rounds `bytes` up to the next page multiple.
pub const fn page_round_up(bytes: usize) -> usize {
    (bytes + PGSIZE - 1) & !(PGSIZE - 1)
}

/// Start of the non-canonical/kernel half of the address space: fault
/// addresses at or above this are never valid user VAs (spec.md §4.7:
/// "Kernel VA or null ⇒ kill the process").
pub const KERNEL_BASE: usize = 0x8000_0000_0000;

/// Sectors per cluster. The spec allows this to vary; one is the common
/// case and keeps cluster/sector arithmetic a straight multiply.
pub const SECTORS_PER_CLUSTER: u32 = 1;

/// Sectors needed to back one page-sized swap slot.
pub const SECTORS_PER_PAGE: u32 = (PGSIZE / SECTOR_SIZE) as u32;

/// Bytes held by one cluster.
pub const CLUSTER_SIZE: usize = SECTOR_SIZE * SECTORS_PER_CLUSTER as usize;

/// Cluster id 0 means "no successor / free". Never allocated.
pub const FREE_CLUSTER: u32 = 0;

/// Sentinel marking the end of a cluster chain.
pub const EOC: u32 = 0x0FFF_FFFF;

/// Little-endian magic stamped into every on-disk inode.
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// Root directory's first cluster, fixed by the on-disk layout.
pub const ROOT_DIR_CLUSTER: u32 = 1;

/// Maximum number of in-memory open inodes (the open-inode set's capacity).
pub const NINODE: usize = 64;

/// Maximum symlink hops `fs::path` will follow before giving up.
pub const MAX_SYMLINK_FOLLOW: usize = 8;

/// Longest symlink target stored inline in a `Dinode`.
pub const SYMLINK_MAX: usize = 128;

/// Physical frames backing the user pool. Kept small so eviction races are
/// exercised by ordinary tests (spec.md scenario 3, "swap thrash").
pub const NFRAME: usize = 32;

/// Top of user address space; stack grows down from here.
pub const USER_STACK: usize = 0x7FFF_FFFF_F000;

/// Stack is allowed to grow until it is this many bytes below `USER_STACK`.
pub const STACK_LIMIT: usize = 1024 * 1024;

/// How far below the current stack pointer a fault is still considered a
/// stack-growth request rather than garbage (covers `PUSH`/`CALL` underflow).
pub const STACK_HEURISTIC_SLACK: usize = 8;
