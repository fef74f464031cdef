use crate::error::{Error, Result};

/// Sentinel for "no sector" and "no file".
pub(crate) const NOT_ALLOCATED: u8 = 0xFF;

/// File id that never exists on flash; `stat` with it reports free space.
pub const FILE_ID_NONE: u8 = NOT_ALLOCATED;

/// Largest page the per-handle page buffer can hold.
pub const MAX_PAGE_SIZE: usize = 512;

const MIN_PAGE_SIZE: u32 = 16;

/// Sentinel for unsealed sizes and never-erased wear counters.
pub(crate) const UNSET: u32 = 0xFFFF_FFFF;

/// Physical layout of one drive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Geometry {
    /// Number of sectors. Indices stop at `0xFE`, `0xFF` terminates chains.
    pub sectors: u8,
    /// Pages per sector, including the header page.
    pub pages_per_sector: u32,
    /// Page size in bytes, a power of two.
    pub page_size: u32,
}

impl Geometry {
    /// 16 MiB QSPI NOR part: 64 KiB sectors of 256 byte pages.
    pub const DEFAULT: Self = Self::new(255, 256, 256);

    pub const fn new(sectors: u8, pages_per_sector: u32, page_size: u32) -> Self {
        Self {
            sectors,
            pages_per_sector,
            page_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let device_size = self
            .page_size
            .checked_mul(self.pages_per_sector)
            .and_then(|sector_size| sector_size.checked_mul(self.sectors as u32));
        if self.sectors == 0
            || !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size as usize > MAX_PAGE_SIZE
            || self.pages_per_sector < 2
            || device_size.is_none()
        {
            return Err(Error::BadDevice);
        }
        Ok(())
    }

    pub const fn sector_size(&self) -> u32 {
        self.page_size * self.pages_per_sector
    }

    /// Bytes of a sector available to write records; the header takes one page.
    pub const fn usable_size(&self) -> u32 {
        self.sector_size() - self.page_size
    }

    pub const fn sector_address(&self, sector: u8) -> u32 {
        sector as u32 * self.sector_size()
    }

    /// Flash address of `offset` within the data area of `sector`.
    pub const fn data_address(&self, sector: u8, offset: u32) -> u32 {
        self.sector_address(sector) + self.page_size + offset
    }

    /// Bytes left until the page boundary following `offset`.
    pub(crate) const fn page_remaining(&self, offset: u32) -> u32 {
        self.page_size - (offset & (self.page_size - 1))
    }

    pub(crate) const fn page_start(&self, offset: u32) -> u32 {
        offset & !(self.page_size - 1)
    }

    /// Size of the backing device in bytes.
    pub const fn device_size(&self) -> u64 {
        self.sectors as u64 * self.sector_size() as u64
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::DEFAULT
    }
}
