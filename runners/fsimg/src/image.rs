use std::{
    fs::{File, OpenOptions},
    io::{self, Read as _, Seek as _, SeekFrom, Write as _},
    path::Path,
};

use flash_fs::{FlashDevice, FlashError, Geometry};
use log::{debug, info, warn};

/// Flash image kept in a host file, drive `0` only.
///
/// Programming ANDs into the existing bytes like a NOR part does, erasing
/// writes `0xFF`.
pub struct FileImage {
    file: File,
    size: u64,
    sector_size: u32,
}

impl FileImage {
    /// Open `path`, creating an erased image of the geometry's size if missing.
    pub fn open(path: &Path, geometry: Geometry) -> io::Result<Self> {
        let size = geometry.device_size();
        let sector_size = geometry.sector_size();
        let exists = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if exists {
            let len = file.metadata()?.len();
            if len != size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("image is {len} bytes, geometry needs {size}"),
                ));
            }
            info!("using existing image {path:?}");
        } else {
            let erased = vec![0xFFu8; sector_size as usize];
            for _ in 0..geometry.sectors {
                file.write_all(&erased)?;
            }
            file.flush()?;
            info!("created erased image {path:?} ({size} bytes)");
        }

        Ok(Self {
            file,
            size,
            sector_size,
        })
    }

    fn check(&self, drive: u8, address: u32, len: usize) -> Result<(), FlashError> {
        if drive != 0 {
            return Err(FlashError::InvalidDrive);
        }
        if address as u64 + len as u64 > self.size {
            warn!("access {address:#x}+{len:#x} outside image");
            return Err(FlashError::Device);
        }
        Ok(())
    }

    fn read_at(&mut self, address: u32, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(address as u64))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, address: u32, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(address as u64))?;
        self.file.write_all(data)?;
        self.file.flush()
    }
}

fn io_error(error: io::Error) -> FlashError {
    warn!("image i/o failed: {error}");
    FlashError::Device
}

impl FlashDevice for FileImage {
    fn read(&mut self, drive: u8, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check(drive, address, buf.len())?;
        self.read_at(address, buf).map_err(io_error)
    }

    fn write(&mut self, drive: u8, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check(drive, address, data.len())?;
        let mut cells = vec![0u8; data.len()];
        self.read_at(address, &mut cells).map_err(io_error)?;
        for (cell, byte) in cells.iter_mut().zip(data) {
            *cell &= *byte;
        }
        debug!("program {:#x} {:#x}", address, data.len());
        self.write_at(address, &cells).map_err(io_error)
    }

    fn erase(&mut self, drive: u8, address: u32, len: u32) -> Result<(), FlashError> {
        self.check(drive, address, len as usize)?;
        if address % self.sector_size != 0 || len % self.sector_size != 0 {
            warn!("unaligned erase {address:#x}+{len:#x}");
            return Err(FlashError::Device);
        }
        debug!("erase {:#x} {:#x}", address, len);
        let erased = vec![0xFFu8; len as usize];
        self.write_at(address, &erased).map_err(io_error)
    }
}
