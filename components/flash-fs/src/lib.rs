#![no_std]

//! Log-structured, wear-levelling filesystem for raw NOR flash.
//!
//! Files are identified by a single byte and stored as a chain of
//! *allocation units*, one per flash sector. There is no file table: every
//! file's identity, size and attributes are reconstructed from the sector
//! headers on demand, so the only RAM kept between calls is one header cache
//! per mounted device and one page buffer per open handle.
//!
//! # Sector Layout
//! ```text
//! | header page | data page 0 | data page 1 | … | data page N-2 |
//! ```
//! The header page starts with (little endian):
//!
//! | bytes   | content                                       |
//! |---------|-----------------------------------------------|
//! |  0      | owning file id, `0xFF` when free              |
//! |  1      | protect bits, odd popcount = protected        |
//! |  2      | next allocation unit, `0xFF` for the tail     |
//! |  3      | mode flags (low nibble), user flags (high)    |
//! |  4 - 7  | raw bytes used, `0xFFFFFFFF` until sealed     |
//! |  8 - 11 | user bytes stored, `0xFFFFFFFF` until sealed  |
//! | 12 - 15 | wear counter, `0xFFFFFFFF` on a virgin sector |
//!
//! Data pages hold *write records*: a little-endian `u16` length that counts
//! itself, followed by `length - 2` payload bytes. A length of `0xFFFF` (erased
//! flash) terminates the page.
//!
//! # Important Implementation Details
//! * Flash is only ever programmed from 1 to 0. The header of a sector is
//!   written once at allocation and a second time when the sector is sealed,
//!   both times only clearing bits that are still set.
//! * Nothing is atomic across sectors. A power loss leaves at worst an unsealed
//!   tail or an orphaned sector; corrupted record streams are detected while
//!   scanning and reported as [`Error::FilesystemCorrupted`], never repaired.

delog::generate_macros!();

mod allocator;
mod cache;
mod chain;
mod device;
mod error;
mod flash;
mod fs;
mod geometry;
mod handle;
mod header;
#[cfg(any(test, feature = "ram"))]
mod ram;
mod scan;

pub use crate::error::{Error, Result};
pub use crate::flash::{FlashDevice, FlashError, NorFlashDevice};
pub use crate::fs::{FlashFs, Mode, Stat, Volume};
pub use crate::geometry::{Geometry, FILE_ID_NONE, MAX_PAGE_SIZE};
pub use crate::handle::Handle;
pub use crate::header::UnitHeader;
#[cfg(any(test, feature = "ram"))]
pub use crate::ram::RamFlash;


#[cfg(any(test, feature = "ram"))]
extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate std;
