use crate::error::{Error, Result};
use crate::fs::Mode;
use crate::geometry::MAX_PAGE_SIZE;

const GENERATION_MASK: u32 = 0x00FF_FFFF;

/// Opaque reference to an open file.
///
/// Encodes the pool slot and the slot's generation, so a handle that was
/// closed (or never issued) is rejected even after its slot is reused.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Handle {
    index: u8,
    generation: u32,
}

impl Handle {
    /// Raw value for protocol layers: generation in the upper 24 bits.
    pub const fn into_raw(self) -> u32 {
        (self.generation << 8) | self.index as u32
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self {
            index: raw as u8,
            generation: raw >> 8,
        }
    }
}

/// Cursor and page buffer of one open file.
pub(crate) struct OpenFile {
    pub device: usize,
    pub file_id: u8,
    pub mode: Mode,
    pub user_flags: u8,
    /// First unit of the chain as seen by this handle.
    pub root: u8,
    /// Unit the cursor is in.
    pub unit: u8,
    /// Cursor within the unit's data area.
    pub offset: u32,
    /// Writers: offset up to which flash is programmed.
    /// Readers: offset at which the unit's record stream ends.
    pub end: u32,
    /// Payload bytes in the cursor's unit, only tracked by writers.
    pub user_size: u32,
    /// Writers: the open record, length prefix first.
    /// Readers: a copy of the page named by `loaded`.
    pub page: [u8; MAX_PAGE_SIZE],
    pub loaded: Option<(u8, u32)>,
}

impl OpenFile {
    pub fn new(device: usize, file_id: u8, mode: Mode, user_flags: u8) -> Self {
        Self {
            device,
            file_id,
            mode,
            user_flags,
            root: crate::geometry::NOT_ALLOCATED,
            unit: crate::geometry::NOT_ALLOCATED,
            offset: 0,
            end: 0,
            user_size: 0,
            page: [0xFF; MAX_PAGE_SIZE],
            loaded: None,
        }
    }

    pub fn is_writeable(&self) -> bool {
        self.mode.contains(Mode::WRITEABLE)
    }

    pub fn is_circular(&self) -> bool {
        self.mode.contains(Mode::CIRCULAR)
    }

    /// Bytes cached but not yet programmed.
    pub fn cached(&self) -> u32 {
        self.offset - self.end
    }
}

struct Slot {
    generation: u32,
    file: Option<OpenFile>,
}

/// Fixed pool of open files, handed out round-robin.
pub(crate) struct HandlePool<const N: usize> {
    slots: [Slot; N],
    next: usize,
}

impl<const N: usize> HandlePool<N> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot {
                generation: 0,
                file: None,
            }),
            next: 0,
        }
    }

    /// Index of the next free slot, without claiming it.
    pub fn reserve(&self) -> Result<usize> {
        (0..N)
            .map(|i| (self.next + i) % N)
            .find(|&index| self.slots[index].file.is_none())
            .ok_or(Error::NoFreeHandle)
    }

    pub fn install(&mut self, index: usize, file: OpenFile) -> Handle {
        let slot = &mut self.slots[index];
        debug_assert!(slot.file.is_none());
        slot.file = Some(file);
        self.next = (index + 1) % N;
        Handle {
            index: index as u8,
            generation: slot.generation,
        }
    }

    pub fn get(&self, handle: Handle) -> Result<&OpenFile> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.file.as_ref())
            .ok_or(Error::InvalidHandle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut OpenFile> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.file.as_mut())
            .ok_or(Error::InvalidHandle)
    }

    pub fn release(&mut self, handle: Handle) -> Result<OpenFile> {
        self.get(handle)?;
        let slot = &mut self.slots[handle.index as usize];
        slot.generation = (slot.generation + 1) & GENERATION_MASK;
        slot.file.take().ok_or(Error::InvalidHandle)
    }

    /// Live handle in slot `index`, if any.
    pub fn handle_at(&self, index: usize) -> Option<Handle> {
        let slot = self.slots.get(index)?;
        slot.file.as_ref().map(|_| Handle {
            index: index as u8,
            generation: slot.generation,
        })
    }

    pub fn device_of(&self, handle: Handle) -> Result<usize> {
        self.get(handle).map(|file| file.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> OpenFile {
        OpenFile::new(0, 1, Mode::READ_ONLY, 0)
    }

    #[test]
    fn exhausts_and_reuses_slots_round_robin() {
        let mut pool = HandlePool::<3>::new();
        let handles: [Handle; 3] = core::array::from_fn(|_| {
            let index = pool.reserve().unwrap();
            pool.install(index, file())
        });
        assert_eq!(pool.reserve().err(), Some(Error::NoFreeHandle));

        pool.release(handles[1]).unwrap();
        let index = pool.reserve().unwrap();
        assert_eq!(index, 1);
        let reused = pool.install(index, file());
        assert_ne!(reused, handles[1]);
        assert_eq!(pool.get(handles[1]).err(), Some(Error::InvalidHandle));
        assert!(pool.get(reused).is_ok());
    }

    #[test]
    fn rejects_stale_and_foreign_values() {
        let mut pool = HandlePool::<3>::new();
        let index = pool.reserve().unwrap();
        let handle = pool.install(index, file());
        assert_eq!(Handle::from_raw(handle.into_raw()), handle);

        pool.release(handle).unwrap();
        assert_eq!(pool.release(handle).err(), Some(Error::InvalidHandle));
        assert_eq!(
            pool.get(Handle::from_raw(0xDEAD_BE07)).err(),
            Some(Error::InvalidHandle)
        );
    }

    quickcheck::quickcheck! {
        fn garbage_handles_are_rejected(raw: u32) -> bool {
            let pool = HandlePool::<3>::new();
            pool.get(Handle::from_raw(raw)).is_err()
        }
    }
}
