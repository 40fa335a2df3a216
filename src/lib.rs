//! rv6vm: demand-paged virtual memory and a FAT-style file system core,
//! the part of a teaching OS kernel that actually carries the design.
//!
//! Threads, system-call dispatch, boot, and the disk ISR are external
//! collaborators of this crate; it only fixes the narrow contracts it
//! needs from them (see `kalloc`, `bio`, `mmu`, `proc`).
#![cfg_attr(not(test), no_std)]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;

#[macro_use]
pub mod printf;

pub mod error;
pub mod param;
pub mod lock;
pub mod kalloc;
pub mod bio;
pub mod mmu;
pub mod proc;
pub mod fs;
pub mod vm;

pub use error::{Error, Result};
