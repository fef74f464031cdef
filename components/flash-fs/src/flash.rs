use embedded_storage::nor_flash::{NorFlash, NorFlashError as _, ReadNorFlash};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlashError {
    /// No such drive behind this adapter.
    InvalidDrive,
    /// The part rejected or failed the operation.
    Device,
}

/// Raw access to one or more NOR flash drives.
///
/// Addresses are byte offsets from the start of the drive. Implementations
/// must follow NOR semantics: `write` only clears bits, `erase` resets whole
/// sectors to `0xFF` and is only called with sector aligned ranges.
pub trait FlashDevice {
    fn read(&mut self, drive: u8, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;
    fn write(&mut self, drive: u8, address: u32, data: &[u8]) -> Result<(), FlashError>;
    fn erase(&mut self, drive: u8, address: u32, len: u32) -> Result<(), FlashError>;
}

impl<T: FlashDevice + ?Sized> FlashDevice for &mut T {
    fn read(&mut self, drive: u8, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        T::read(self, drive, address, buf)
    }

    fn write(&mut self, drive: u8, address: u32, data: &[u8]) -> Result<(), FlashError> {
        T::write(self, drive, address, data)
    }

    fn erase(&mut self, drive: u8, address: u32, len: u32) -> Result<(), FlashError> {
        T::erase(self, drive, address, len)
    }
}

/// Largest read/write granularity [`NorFlashDevice`] can pad to.
const MAX_ACCESS_UNIT: usize = 16;

/// Single drive (drive `0`) backed by an `embedded-storage` NOR part.
///
/// Accesses that are not aligned to the part's read or write size are widened
/// to whole units; writes pad with `0xFF`, which leaves already programmed
/// bits untouched. The part therefore has to accept repeated programming of
/// the same unit.
pub struct NorFlashDevice<T> {
    flash: T,
}

impl<T: NorFlash> NorFlashDevice<T> {
    pub fn new(flash: T) -> Self {
        Self { flash }
    }

    pub fn into_inner(self) -> T {
        self.flash
    }

    fn check_drive(drive: u8) -> Result<(), FlashError> {
        if drive == 0 {
            Ok(())
        } else {
            Err(FlashError::InvalidDrive)
        }
    }
}

fn map_nor_error<E: embedded_storage::nor_flash::NorFlashError>(error: E) -> FlashError {
    warn!("nor flash error: {:?}", error.kind());
    FlashError::Device
}

impl<T: NorFlash> FlashDevice for NorFlashDevice<T> {
    fn read(&mut self, drive: u8, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        Self::check_drive(drive)?;
        let unit = <T as ReadNorFlash>::READ_SIZE;
        if unit <= 1 || (address as usize % unit == 0 && buf.len() % unit == 0) {
            return self.flash.read(address, buf).map_err(map_nor_error);
        }
        if unit > MAX_ACCESS_UNIT {
            return Err(FlashError::Device);
        }

        let mut address = address;
        let mut done = 0;
        while done < buf.len() {
            let start = address - address % unit as u32;
            let skip = (address - start) as usize;
            let take = core::cmp::min(unit - skip, buf.len() - done);
            let mut chunk = [0xFF; MAX_ACCESS_UNIT];
            self.flash
                .read(start, &mut chunk[..unit])
                .map_err(map_nor_error)?;
            buf[done..done + take].copy_from_slice(&chunk[skip..skip + take]);
            done += take;
            address += take as u32;
        }
        Ok(())
    }

    fn write(&mut self, drive: u8, address: u32, data: &[u8]) -> Result<(), FlashError> {
        Self::check_drive(drive)?;
        let unit = T::WRITE_SIZE;
        if unit <= 1 || (address as usize % unit == 0 && data.len() % unit == 0) {
            return self.flash.write(address, data).map_err(map_nor_error);
        }
        if unit > MAX_ACCESS_UNIT {
            return Err(FlashError::Device);
        }

        let mut address = address;
        let mut data = data;
        while !data.is_empty() {
            let start = address - address % unit as u32;
            let skip = (address - start) as usize;
            if skip == 0 && data.len() >= unit {
                let body = data.len() - data.len() % unit;
                self.flash
                    .write(address, &data[..body])
                    .map_err(map_nor_error)?;
                address += body as u32;
                data = &data[body..];
                continue;
            }
            let take = core::cmp::min(unit - skip, data.len());
            let mut chunk = [0xFF; MAX_ACCESS_UNIT];
            chunk[skip..skip + take].copy_from_slice(&data[..take]);
            self.flash
                .write(start, &chunk[..unit])
                .map_err(map_nor_error)?;
            address += take as u32;
            data = &data[take..];
        }
        Ok(())
    }

    fn erase(&mut self, drive: u8, address: u32, len: u32) -> Result<(), FlashError> {
        Self::check_drive(drive)?;
        trace!("EE {:x} {:x}", address, len);
        self.flash
            .erase(address, address + len)
            .map_err(map_nor_error)
    }
}
