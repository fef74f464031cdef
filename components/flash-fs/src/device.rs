use crate::error::Result;
use crate::flash::FlashDevice;
use crate::geometry::Geometry;
use crate::header::{UnitHeader, HEADER_LEN, INFO_LEN, PROTECT_OFFSET};

/// Per-drive state: the mount flag and a one-entry header cache.
///
/// Header setters only touch the cache; `write_info` persists it. Accessing
/// any other sector replaces the cached header, so a modified header must be
/// written before another sector is looked at.
pub(crate) struct DeviceContext {
    pub drive: u8,
    pub mounted: bool,
    cached: Option<u8>,
    header: UnitHeader,
}

impl DeviceContext {
    pub const fn new(drive: u8) -> Self {
        Self {
            drive,
            mounted: false,
            cached: None,
            header: UnitHeader::ERASED,
        }
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

/// Borrowed view of one drive while an operation runs.
pub(crate) struct Drive<'a, F> {
    pub flash: &'a mut F,
    pub context: &'a mut DeviceContext,
    pub geometry: Geometry,
}

impl<'a, F: FlashDevice> Drive<'a, F> {
    pub fn new(flash: &'a mut F, context: &'a mut DeviceContext, geometry: Geometry) -> Self {
        Self {
            flash,
            context,
            geometry,
        }
    }

    fn load(&mut self, sector: u8) -> Result<()> {
        if self.context.cached != Some(sector) {
            let mut raw = [0u8; HEADER_LEN];
            let address = self.geometry.sector_address(sector);
            self.flash.read(self.context.drive, address, &mut raw)?;
            self.context.header = UnitHeader::from_bytes(&raw);
            self.context.cached = Some(sector);
        }
        Ok(())
    }

    pub fn unit(&mut self, sector: u8) -> Result<UnitHeader> {
        self.load(sector)?;
        Ok(self.context.header)
    }

    pub fn unit_mut(&mut self, sector: u8) -> Result<&mut UnitHeader> {
        self.load(sector)?;
        Ok(&mut self.context.header)
    }

    /// Replace the cached header of `sector` without reading flash.
    pub fn set_unit(&mut self, sector: u8, header: UnitHeader) {
        self.context.header = header;
        self.context.cached = Some(sector);
    }

    /// Program the cached header of `sector`, all fields but the wear counter.
    pub fn write_info(&mut self, sector: u8) -> Result<()> {
        self.load(sector)?;
        let raw = self.context.header.to_bytes();
        let address = self.geometry.sector_address(sector);
        trace!("hdr {:x} {}", address, delog::hex_str!(&raw[..4]));
        self.flash
            .write(self.context.drive, address, &raw[..INFO_LEN])?;
        Ok(())
    }

    pub fn write_protect_bits(&mut self, sector: u8, bits: u8) -> Result<()> {
        self.load(sector)?;
        let address = self.geometry.sector_address(sector) + PROTECT_OFFSET;
        self.flash.write(self.context.drive, address, &[bits])?;
        self.context.header.protect_bits = bits;
        Ok(())
    }

    pub fn read_data(&mut self, sector: u8, offset: u32, buf: &mut [u8]) -> Result<()> {
        let address = self.geometry.data_address(sector, offset);
        self.flash.read(self.context.drive, address, buf)?;
        Ok(())
    }

    pub fn write_data(&mut self, sector: u8, offset: u32, data: &[u8]) -> Result<()> {
        let address = self.geometry.data_address(sector, offset);
        trace!("w {:x} {:x}", address, data.len());
        self.flash.write(self.context.drive, address, data)?;
        Ok(())
    }
}
