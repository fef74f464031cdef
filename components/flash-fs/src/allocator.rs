use crate::device::Drive;
use crate::error::{Error, Result};
use crate::flash::FlashDevice;
use crate::geometry::{NOT_ALLOCATED, UNSET};
use crate::handle::OpenFile;
use crate::header::{UnitHeader, MODE_CIRCULAR, WEAR_OFFSET};

impl<F: FlashDevice> Drive<'_, F> {
    /// Least worn free unit. A virgin unit is taken as soon as it is seen.
    pub fn find_free_unit(&mut self) -> Result<Option<u8>> {
        let mut best: Option<(u8, u32)> = None;
        for sector in 0..self.geometry.sectors {
            let unit = self.unit(sector)?;
            if !unit.is_free() {
                continue;
            }
            if unit.is_virgin() {
                return Ok(Some(sector));
            }
            if best.map_or(true, |(_, wear)| unit.wear_counter < wear) {
                best = Some((sector, unit.wear_counter));
            }
        }
        Ok(best.map(|(sector, _)| sector))
    }

    /// Erase `sector` and persist its incremented wear counter.
    pub fn erase_unit(&mut self, sector: u8) -> Result<()> {
        let wear = self.unit(sector)?.wear_counter.wrapping_add(1);
        let address = self.geometry.sector_address(sector);
        let drive = self.context.drive;

        self.context.invalidate();
        self.flash
            .erase(drive, address, self.geometry.sector_size())?;
        self.flash
            .write(drive, address + WEAR_OFFSET, &wear.to_le_bytes())?;
        self.set_unit(
            sector,
            UnitHeader {
                wear_counter: wear,
                ..UnitHeader::ERASED
            },
        );
        debug!("erased unit {} wear {}", sector, wear);
        Ok(())
    }

    /// Append a unit to the chain of `file` and move its cursor there.
    ///
    /// The previous tail is linked and sealed with its final sizes. Without a
    /// free unit a circular file gives up its root instead.
    pub fn allocate_unit(&mut self, file: &mut OpenFile) -> Result<()> {
        let protect_bits = if file.root == NOT_ALLOCATED {
            0xFF
        } else {
            self.unit(file.root)?.protect_bits
        };

        let sector = match self.find_free_unit()? {
            Some(sector) => sector,
            None if file.is_circular() && file.root != NOT_ALLOCATED => {
                let recycled = file.root;
                let successor = self.unit(recycled)?.next;
                self.erase_unit(recycled)?;
                file.root = successor;
                debug!("file {} recycles root {}", file.file_id, recycled);
                recycled
            }
            None => {
                debug!("no free unit for file {}", file.file_id);
                return Err(Error::FilesystemFull);
            }
        };

        let header = self.unit_mut(sector)?;
        header.file_id = file.file_id;
        header.protect_bits = protect_bits;
        header.next = NOT_ALLOCATED;
        header.mode_flags = file.mode.bits() & MODE_CIRCULAR;
        header.user_flags = file.user_flags;
        header.raw_size = UNSET;
        header.user_size = UNSET;
        self.write_info(sector)?;

        if file.root == NOT_ALLOCATED {
            file.root = sector;
        } else {
            let tail = self.unit_mut(file.unit)?;
            tail.next = sector;
            tail.raw_size = file.offset;
            tail.user_size = file.user_size;
            self.write_info(file.unit)?;
        }
        debug!("file {} extended to unit {}", file.file_id, sector);

        file.unit = sector;
        file.offset = 0;
        file.end = 0;
        file.user_size = 0;
        Ok(())
    }
}
