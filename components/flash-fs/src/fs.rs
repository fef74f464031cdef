use crate::device::{DeviceContext, Drive};
use crate::error::{Error, Result};
use crate::flash::FlashDevice;
use crate::geometry::{Geometry, FILE_ID_NONE};
use crate::handle::{Handle, HandlePool, OpenFile};
use crate::header::{is_protected, set_protected, UnitHeader, MODE_CIRCULAR};

bitflags::bitflags! {
    /// How a file is opened.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Mode: u8 {
        /// Recycle the oldest unit once the filesystem is full.
        const CIRCULAR = 0x02;
        const WRITEABLE = 0x04;
        /// The file must not exist yet.
        const CREATE = 0x08;
    }
}

impl Mode {
    pub const READ_ONLY: Self = Self::empty();
    /// Append to an existing file.
    pub const WRITE_ONLY: Self = Self::WRITEABLE;
    pub const CREATE_NEW: Self = Self::CREATE.union(Self::WRITEABLE);
    pub const CREATE_CIRCULAR: Self = Self::CREATE_NEW.union(Self::CIRCULAR);
}

/// A mounted drive, as returned by [`FlashFs::mount`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Volume(u8);

impl Volume {
    pub const fn drive(self) -> u8 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stat {
    /// Payload bytes of the file, or free bytes for [`FILE_ID_NONE`].
    pub size: u32,
    pub user_flags: u8,
    pub is_protected: bool,
    pub is_circular: bool,
}

/// Filesystem over the drives of one flash adapter.
///
/// `DEVICES` drives share one geometry; `HANDLES` files can be open at once.
pub struct FlashFs<F, const DEVICES: usize = 1, const HANDLES: usize = 3> {
    flash: F,
    geometry: Geometry,
    devices: [DeviceContext; DEVICES],
    handles: HandlePool<HANDLES>,
}

impl<F: FlashDevice, const DEVICES: usize, const HANDLES: usize> FlashFs<F, DEVICES, HANDLES> {
    const LIMITS: () = assert!(
        DEVICES > 0 && DEVICES <= 255 && HANDLES > 0 && HANDLES <= 255,
        "between 1 and 255 devices and handles"
    );

    /// Wrap `flash`, with every handle free and no drive mounted.
    pub fn new(flash: F, geometry: Geometry) -> Result<Self> {
        #[allow(clippy::let_unit_value)]
        let () = Self::LIMITS;
        geometry.validate()?;
        Ok(Self {
            flash,
            geometry,
            devices: core::array::from_fn(|drive| DeviceContext::new(drive as u8)),
            handles: HandlePool::new(),
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Direct access to the adapter. Cached headers are dropped, so changes
    /// made through it are seen by the next operation.
    pub fn flash_mut(&mut self) -> &mut F {
        for device in self.devices.iter_mut() {
            device.invalidate();
        }
        &mut self.flash
    }

    pub fn into_flash(self) -> F {
        self.flash
    }

    fn check_drive(drive: u8) -> Result<usize> {
        if (drive as usize) < DEVICES {
            Ok(drive as usize)
        } else {
            Err(Error::BadDevice)
        }
    }

    fn parts(&mut self, device: usize) -> Result<(Drive<'_, F>, &mut HandlePool<HANDLES>)> {
        let context = self
            .devices
            .get_mut(device)
            .filter(|context| context.mounted)
            .ok_or(Error::BadDevice)?;
        let drive = Drive::new(&mut self.flash, context, self.geometry);
        Ok((drive, &mut self.handles))
    }

    fn drive(&mut self, volume: Volume) -> Result<Drive<'_, F>> {
        self.parts(volume.index()).map(|(drive, _)| drive)
    }

    fn open_file(&mut self, handle: Handle) -> Result<(&mut OpenFile, Drive<'_, F>)> {
        let file = self.handles.get_mut(handle)?;
        let context = self.devices.get_mut(file.device).ok_or(Error::BadDevice)?;
        Ok((file, Drive::new(&mut self.flash, context, self.geometry)))
    }

    /// Forget every handle on `drive` without flushing.
    pub fn init(&mut self, drive: u8) -> Result<()> {
        let device = Self::check_drive(drive)?;
        for index in 0..HANDLES {
            if let Some(handle) = self.handles.handle_at(index) {
                if self.handles.device_of(handle)? == device {
                    self.handles.release(handle)?;
                }
            }
        }
        self.devices[device].invalidate();
        Ok(())
    }

    /// Close every handle on `drive` and unmount it.
    pub fn term(&mut self, drive: u8) -> Result<()> {
        let device = Self::check_drive(drive)?;
        for index in 0..HANDLES {
            if let Some(handle) = self.handles.handle_at(index) {
                if self.handles.device_of(handle)? == device {
                    self.close(handle)?;
                }
            }
        }
        let context = &mut self.devices[device];
        context.mounted = false;
        context.invalidate();
        info!("unmounted drive {}", drive);
        Ok(())
    }

    /// Bind `drive` to a volume. Does not touch flash.
    pub fn mount(&mut self, drive: u8) -> Result<Volume> {
        let device = Self::check_drive(drive)?;
        let context = &mut self.devices[device];
        context.mounted = true;
        context.invalidate();
        info!("mounted drive {}", drive);
        Ok(Volume(drive))
    }

    /// Erase every unit, keeping the wear counters.
    pub fn format(&mut self, volume: Volume) -> Result<()> {
        let mut drive = self.drive(volume)?;
        for sector in 0..drive.geometry.sectors {
            drive.erase_unit(sector)?;
        }
        info!("formatted drive {}", volume.drive());
        Ok(())
    }

    pub fn open(
        &mut self,
        volume: Volume,
        file_id: u8,
        mode: Mode,
        user_flags: Option<u8>,
    ) -> Result<Handle> {
        let create = mode.contains(Mode::CREATE);
        if file_id == FILE_ID_NONE {
            return Err(if create {
                Error::InvalidFileId
            } else {
                Error::FileNotFound
            });
        }

        let (mut drive, handles) = self.parts(volume.index())?;
        let root = drive.find_root(file_id)?;
        match root {
            None if !create => return Err(Error::FileNotFound),
            Some(_) if create => return Err(Error::FileAlreadyExists),
            Some(root) if mode.contains(Mode::WRITEABLE) => {
                if drive.unit(root)?.is_protected() {
                    return Err(Error::FileProtected);
                }
            }
            _ => {}
        }

        let index = handles.reserve()?;
        let mut file = OpenFile::new(volume.index(), file_id, mode, 0);
        match root {
            Some(root) => {
                let header = drive.unit(root)?;
                file.mode |= Mode::from_bits_truncate(header.mode_flags & MODE_CIRCULAR);
                file.user_flags = header.user_flags;
                file.root = root;
                if file.is_writeable() {
                    let (tail, extent) = drive.find_eof(root)?;
                    file.unit = tail;
                    file.offset = extent.raw;
                    file.end = extent.raw;
                    file.user_size = extent.user;
                } else {
                    let extent = drive.find_end_of_sector(root)?;
                    file.unit = root;
                    file.end = extent.raw;
                }
            }
            None => {
                file.user_flags = user_flags.unwrap_or(0) & 0x0F;
                drive.allocate_unit(&mut file)?;
            }
        }

        let handle = handles.install(index, file);
        debug!("open {} {:x} -> {:x}", file_id, mode.bits(), handle.into_raw());
        Ok(handle)
    }

    /// Flush (best effort) and release `handle`.
    pub fn close(&mut self, handle: Handle) -> Result<()> {
        let (file, mut drive) = self.open_file(handle)?;
        if file.is_writeable() {
            if let Err(_error) = drive.flush_cache(file) {
                warn!("close {:x}: flush failed {:?}", handle.into_raw(), _error);
            }
        }
        self.handles.release(handle)?;
        Ok(())
    }

    /// Append `data`. A short count means an error stopped the write after
    /// some bytes were taken; the next call reports it.
    pub fn write(&mut self, handle: Handle, data: &[u8]) -> Result<usize> {
        let (file, mut drive) = self.open_file(handle)?;
        if !file.is_writeable() {
            return Err(Error::InvalidMode);
        }

        let mut written = 0;
        while written < data.len() {
            match drive.write_through_cache(file, &data[written..]) {
                Ok(n) => written += n,
                Err(_error) if written > 0 => {
                    debug!("short write {} of {}: {:?}", written, data.len(), _error);
                    break;
                }
                Err(error) => return Err(error),
            }
        }
        Ok(written)
    }

    /// Read into `buf`; fewer bytes than requested at the end of the file.
    /// Bytes delivered before a corrupted record are returned as a short
    /// count, the next call reports the corruption.
    pub fn read(&mut self, handle: Handle, buf: &mut [u8]) -> Result<usize> {
        let (file, mut drive) = self.open_file(handle)?;
        if file.is_writeable() {
            return Err(Error::InvalidMode);
        }
        let want = core::cmp::min(buf.len(), u32::MAX as usize);
        let read = drive.scan(file, Some(&mut buf[..want]), want as u32)?;
        Ok(read as usize)
    }

    /// Move the read cursor forward by up to `delta` bytes.
    pub fn seek(&mut self, handle: Handle, delta: u32) -> Result<()> {
        let (file, mut drive) = self.open_file(handle)?;
        if file.is_writeable() {
            return Err(Error::InvalidMode);
        }
        drive.scan(file, None, delta)?;
        Ok(())
    }

    pub fn flush(&mut self, handle: Handle) -> Result<()> {
        let (file, mut drive) = self.open_file(handle)?;
        if !file.is_writeable() {
            return Err(Error::InvalidMode);
        }
        drive.flush_cache(file)
    }

    /// User flags of the file behind `handle`.
    pub fn user_flags(&self, handle: Handle) -> Result<u8> {
        self.handles.get(handle).map(|file| file.user_flags)
    }

    pub fn protect(&mut self, volume: Volume, file_id: u8) -> Result<()> {
        self.set_protection(volume, file_id, true)
    }

    pub fn unprotect(&mut self, volume: Volume, file_id: u8) -> Result<()> {
        self.set_protection(volume, file_id, false)
    }

    fn set_protection(&mut self, volume: Volume, file_id: u8, protect: bool) -> Result<()> {
        let mut drive = self.drive(volume)?;
        let root = drive.find_root(file_id)?.ok_or(Error::FileNotFound)?;
        let bits = drive.unit(root)?.protect_bits;
        let next = set_protected(bits, protect);
        if next != bits {
            drive.write_protect_bits(root, next)?;
        } else if is_protected(bits) != protect {
            warn!("file {}: protect bits exhausted", file_id);
        }
        Ok(())
    }

    /// Erase every unit of `file_id`.
    pub fn delete(&mut self, volume: Volume, file_id: u8) -> Result<()> {
        let mut drive = self.drive(volume)?;
        let root = drive.find_root(file_id)?.ok_or(Error::FileNotFound)?;
        if drive.unit(root)?.is_protected() {
            return Err(Error::FileProtected);
        }
        drive.walk_chain(root, |drive, sector| drive.erase_unit(sector))?;
        debug!("deleted file {}", file_id);
        Ok(())
    }

    /// Attributes of `file_id`, or free space for [`FILE_ID_NONE`].
    pub fn stat(&mut self, volume: Volume, file_id: u8) -> Result<Stat> {
        let mut drive = self.drive(volume)?;
        let usable = drive.geometry.usable_size();

        if file_id == FILE_ID_NONE {
            let mut free = 0;
            for sector in 0..drive.geometry.sectors {
                free += if drive.unit(sector)?.is_free() {
                    usable
                } else {
                    usable.saturating_sub(drive.find_end_of_sector(sector)?.raw)
                };
            }
            return Ok(Stat {
                size: free,
                ..Stat::default()
            });
        }

        let root = drive.find_root(file_id)?.ok_or(Error::FileNotFound)?;
        let header = drive.unit(root)?;
        let mut size = 0;
        drive.walk_chain(root, |drive, sector| {
            size += drive.find_end_of_sector(sector)?.user;
            Ok(())
        })?;
        Ok(Stat {
            size,
            user_flags: header.user_flags,
            is_protected: header.is_protected(),
            is_circular: header.is_circular(),
        })
    }

    /// Header of `sector` as stored on flash.
    pub fn unit_header(&mut self, volume: Volume, sector: u8) -> Result<UnitHeader> {
        let mut drive = self.drive(volume)?;
        if sector >= drive.geometry.sectors {
            return Err(Error::BadDevice);
        }
        drive.unit(sector)
    }
}
