use alloc::{vec, vec::Vec};

use crate::flash::{FlashDevice, FlashError};
use crate::geometry::Geometry;

/// RAM-backed NOR flash with one or more drives.
///
/// Enforces the rules a real part enforces silently: programming may only
/// clear bits and erases must cover whole sectors. Violations panic, since
/// they are bugs in the caller. Failures can be injected to exercise error
/// paths.
pub struct RamFlash {
    drives: Vec<Vec<u8>>,
    sector_size: u32,
    fail_after: Option<usize>,
    erases: usize,
    writes: usize,
}

impl RamFlash {
    pub fn new(geometry: Geometry) -> Self {
        Self::with_drives(geometry, 1)
    }

    pub fn with_drives(geometry: Geometry, drives: u8) -> Self {
        let size = geometry.device_size() as usize;
        Self {
            drives: (0..drives).map(|_| vec![0xFF; size]).collect(),
            sector_size: geometry.sector_size(),
            fail_after: None,
            erases: 0,
            writes: 0,
        }
    }

    /// Let `ops` more operations succeed, then fail every operation.
    pub fn fail_after(&mut self, ops: usize) {
        self.fail_after = Some(ops);
    }

    pub fn heal(&mut self) {
        self.fail_after = None;
    }

    /// Overwrite bytes without NOR restrictions.
    pub fn poke(&mut self, drive: u8, address: u32, data: &[u8]) {
        let start = address as usize;
        self.drives[drive as usize][start..start + data.len()].copy_from_slice(data);
    }

    pub fn peek(&self, drive: u8, address: u32, len: usize) -> &[u8] {
        let start = address as usize;
        &self.drives[drive as usize][start..start + len]
    }

    pub fn erase_count(&self) -> usize {
        self.erases
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn tick(&mut self) -> Result<(), FlashError> {
        match self.fail_after {
            Some(0) => Err(FlashError::Device),
            Some(ref mut ops) => {
                *ops -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn region(&mut self, drive: u8, address: u32, len: usize) -> Result<&mut [u8], FlashError> {
        self.tick()?;
        let memory = self
            .drives
            .get_mut(drive as usize)
            .ok_or(FlashError::InvalidDrive)?;
        let start = address as usize;
        memory
            .get_mut(start..start + len)
            .ok_or(FlashError::Device)
    }
}

impl FlashDevice for RamFlash {
    fn read(&mut self, drive: u8, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let region = self.region(drive, address, buf.len())?;
        buf.copy_from_slice(region);
        Ok(())
    }

    fn write(&mut self, drive: u8, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let region = self.region(drive, address, data.len())?;
        for (i, (cell, byte)) in region.iter_mut().zip(data).enumerate() {
            assert_eq!(
                *cell & byte,
                *byte,
                "programming 0 -> 1 at {:#x}",
                address as usize + i
            );
            *cell = *byte;
        }
        self.writes += 1;
        Ok(())
    }

    fn erase(&mut self, drive: u8, address: u32, len: u32) -> Result<(), FlashError> {
        assert_eq!(address % self.sector_size, 0, "unaligned erase");
        assert_eq!(len % self.sector_size, 0, "partial sector erase");
        let region = self.region(drive, address, len as usize)?;
        region.fill(0xFF);
        self.erases += 1;
        Ok(())
    }
}
