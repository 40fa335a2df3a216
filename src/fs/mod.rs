//! File-system layer: the FAT cluster allocator (§4.1), the inode layer
//! (§4.2), open file handles, and bounded symlink resolution, tied together
//! behind one mount-time singleton.
//!
//! Grounded on the teacher kernel's `fs/mod.rs`, which bundles the
//! superblock, the block-bitmap allocator, and the inode table behind a
//! single `FileSystem` struct created once at mount and threaded through
//! explicitly rather than reached via `static`s (spec.md §9 design note:
//! "model as a process-wide `FsState`... pass a handle explicitly rather
//! than through globals").

pub mod fat;
pub mod handle;
pub mod inode;
pub mod path;

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::bio::BlockDevice;
use crate::lock::NamedLock;
use fat::Fat;
use inode::InodeTable;

pub use handle::FileHandle;

/// The mounted file system: the open-inode set, the in-memory FAT, and the
/// raw device they're both built on, plus the file-RW lock spec.md §5 calls
/// out as serializing all inode reads and writes at the file layer.
///
/// Every lock here is named after its spec.md §5 counterpart so a reader
/// can match this struct's fields one-to-one against the lock list.
pub struct FsState {
    device: NamedLock<Box<dyn BlockDevice + Send>>,
    fat: NamedLock<Fat>,
    /// Spec.md §5: "File-RW lock: serializes inode reads and writes at the
    /// file layer (readers and writers share one lock; no reader-writer
    /// distinction)." Acquired by `FileHandle` around every `read_at`/
    /// `write_at`, ahead of (and released well before) any frame-table
    /// lock a caller might also be holding during eviction write-back.
    file_rw: NamedLock<()>,
    inodes: InodeTable,
    fat_start_sector: u32,
}

impl FsState {
    /// Mounts the file system: reads the FAT from `fat_start_sector` and
    /// wires up an empty open-inode set. Mirrors the teacher's `fsinit`.
    pub fn mount(
        mut device: Box<dyn BlockDevice + Send>,
        fat_start_sector: u32,
        cluster_count: u32,
        data_area_base_sector: u32,
        first_data_cluster: u32,
    ) -> Arc<Self> {
        let fat = Fat::mount(
            &mut *device,
            fat_start_sector,
            cluster_count,
            data_area_base_sector,
            first_data_cluster,
        );
        Arc::new(Self {
            device: NamedLock::new("device lock", device),
            fat: NamedLock::new("FAT lock", fat),
            file_rw: NamedLock::new("file-RW lock", ()),
            inodes: InodeTable::new(),
            fat_start_sector,
        })
    }

    /// Writes the FAT back to its reserved region. Spec.md §4.1: "There is
    /// no incremental journaling; a crash between closes may lose recent
    /// allocations" — this is the only persistence point.
    pub fn sync(&self) {
        let fat = self.fat.lock();
        let mut device = self.device.lock();
        fat.sync(&mut **device, self.fat_start_sector);
    }

    /// Creates a fresh, zero-filled inode of `length` bytes at `sector`.
    pub fn create_file(&self, sector: u32, length: u32, is_dir: bool) -> crate::Result<()> {
        let mut device = self.device.lock();
        let mut fat = self.fat.lock();
        self.inodes.create(&mut **device, &mut fat, sector, length, is_dir)
    }

    pub fn create_symlink(&self, sector: u32, target: &str) {
        let mut device = self.device.lock();
        self.inodes.create_symlink(&mut **device, sector, target);
    }

    /// Opens `sector` and wraps it in a fresh `FileHandle` with its own
    /// private position (spec.md §3: "position is private to the handle").
    pub fn open(self: &Arc<Self>, sector: u32) -> FileHandle {
        let inode = {
            let mut device = self.device.lock();
            self.inodes.open(&mut **device, sector)
        };
        FileHandle::new(self.clone(), inode)
    }

    pub fn remove(&self, inode: &Arc<spin::Mutex<inode::Inode>>) {
        inode.lock().mark_removed();
    }

    pub(crate) fn with_device_and_fat<R>(
        &self,
        f: impl FnOnce(&mut dyn BlockDevice, &mut Fat) -> R,
    ) -> R {
        let mut device = self.device.lock();
        let mut fat = self.fat.lock();
        f(&mut **device, &mut fat)
    }

    pub(crate) fn file_rw_lock(&self) -> spin::MutexGuard<'_, ()> {
        self.file_rw.lock()
    }

    pub(crate) fn close(&self, inode: &Arc<spin::Mutex<inode::Inode>>) {
        let mut device = self.device.lock();
        let mut fat = self.fat.lock();
        self.inodes.close(&mut **device, &mut fat, inode);
    }

    /// Resolves `start_sector` to a non-symlink sector, per
    /// `fs::path::resolve_symlinks`.
    pub fn resolve_symlinks(
        &self,
        start_sector: u32,
        resolve_target: impl Fn(&str) -> Option<u32>,
    ) -> crate::Result<u32> {
        let mut device = self.device.lock();
        let mut fat = self.fat.lock();
        path::resolve_symlinks(&self.inodes, &mut **device, &mut fat, start_sector, resolve_target)
    }
}
