//! Open file handles (spec.md §3: "File handle: {inode reference, byte
//! position, deny-write flag, dup count}. Position is private to the
//! handle; the inode is shared.").
//!
//! Supplemented from `original_source/filesys/file.c`'s `file_duplicate`/
//! `file_close`/`file_deny_write` trio (SPEC_FULL §2): a plain `Clone`
//! would share position the way `dup2` should, so `reopen` (independent
//! position, used by mmap) and `dup` (shared position) are kept as two
//! distinct constructors instead of collapsing onto `Clone`.

use alloc::sync::Arc;

use spin::Mutex;

use crate::fs::inode::Inode;
use crate::fs::FsState;

/// A process's private handle onto a shared inode. Spec.md §4.8 step 1:
/// mmap reopens the file "so later `close` by the user does not invalidate
/// the mapping" — `reopen` is exactly that operation.
pub struct FileHandle {
    fs: Arc<FsState>,
    inode: Arc<Mutex<Inode>>,
    pos: Arc<Mutex<u32>>,
    deny_write_held: bool,
}

impl Clone for FileHandle {
    /// `dup2`-style sharing: the new handle sees the same file position as
    /// the original, matching POSIX `dup` semantics (original_source's
    /// `file_duplicate` shares the underlying `struct file`, not just the
    /// inode).
    fn clone(&self) -> Self {
        Self {
            fs: self.fs.clone(),
            inode: self.inode.clone(),
            pos: self.pos.clone(),
            deny_write_held: false,
        }
    }
}

impl FileHandle {
    pub(crate) fn new(fs: Arc<FsState>, inode: Arc<Mutex<Inode>>) -> Self {
        Self {
            fs,
            inode,
            pos: Arc::new(Mutex::new(0)),
            deny_write_held: false,
        }
    }

    /// Reopens the same inode with a brand-new, independent position
    /// (spec.md §4.8 step 1). Bumps the inode's open count.
    pub fn reopen(&self) -> Self {
        let sector = self.inode.lock().sector();
        self.fs.open(sector)
    }

    pub fn inode_sector(&self) -> u32 {
        self.inode.lock().sector()
    }

    pub fn filesize(&self) -> u32 {
        self.inode.lock().length()
    }

    pub fn tell(&self) -> u32 {
        *self.pos.lock()
    }

    pub fn seek(&self, pos: u32) {
        *self.pos.lock() = pos;
    }

    /// Reads at the handle's current position, advancing it by the number
    /// of bytes actually read.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut pos = self.pos.lock();
        let n = self.read_at(buf, *pos);
        *pos += n as u32;
        n
    }

    /// Reads at an explicit offset without disturbing the handle's
    /// position (used by the file-backed page's `swap_in`, spec.md §4.5).
    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> usize {
        let _file_rw = self.fs.file_rw_lock();
        self.fs.with_device_and_fat(|device, fat| {
            self.inode.lock().read_at(device, fat, buf, offset)
        })
    }

    pub fn write(&self, buf: &[u8]) -> usize {
        let mut pos = self.pos.lock();
        let n = self.write_at(buf, *pos);
        *pos += n as u32;
        n
    }

    /// Writes at an explicit offset (used by mmap write-back, spec.md
    /// §4.5/§4.8).
    pub fn write_at(&self, buf: &[u8], offset: u32) -> usize {
        let _file_rw = self.fs.file_rw_lock();
        self.fs.with_device_and_fat(|device, fat| {
            self.inode.lock().write_at(device, fat, buf, offset)
        })
    }

    pub fn deny_write(&mut self) {
        self.inode.lock().deny_write();
        self.deny_write_held = true;
    }

    pub fn allow_write(&mut self) {
        if self.deny_write_held {
            self.inode.lock().allow_write();
            self.deny_write_held = false;
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.allow_write();
        self.fs.close(&self.inode);
    }
}
