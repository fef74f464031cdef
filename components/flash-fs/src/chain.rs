use crate::device::Drive;
use crate::error::{Error, Result};
use crate::flash::FlashDevice;
use crate::geometry::{MAX_PAGE_SIZE, NOT_ALLOCATED};

/// Where the record stream of a unit ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Extent {
    /// Offset of the first unused byte of the data area.
    pub raw: u32,
    /// Payload bytes stored in the unit.
    pub user: u32,
}

/// Sector numbers are below `0xFF`, so this covers every possible successor.
const PARENTS: usize = NOT_ALLOCATED as usize;

impl<F: FlashDevice> Drive<'_, F> {
    /// First unit of the chain owned by `file_id`.
    ///
    /// Units are found in sector order, not chain order: starting from any
    /// owned unit, predecessors are followed until one has none.
    pub fn find_root(&mut self, file_id: u8) -> Result<Option<u8>> {
        if file_id == NOT_ALLOCATED {
            return Ok(None);
        }

        let mut parent = [NOT_ALLOCATED; PARENTS];
        let mut candidate = None;
        for sector in 0..self.geometry.sectors {
            let unit = self.unit(sector)?;
            if unit.file_id != file_id {
                continue;
            }
            if unit.next != NOT_ALLOCATED {
                parent[unit.next as usize] = sector;
            }
            candidate.get_or_insert(sector);
        }

        let Some(mut root) = candidate else {
            return Ok(None);
        };
        for _ in 0..=self.geometry.sectors {
            match parent[root as usize] {
                NOT_ALLOCATED => return Ok(Some(root)),
                previous => root = previous,
            }
        }
        error!("chain of file {} has no root", file_id);
        Err(Error::FilesystemCorrupted)
    }

    /// Last unit of the chain starting at `root`.
    pub fn find_tail(&mut self, root: u8) -> Result<u8> {
        let mut sector = root;
        for _ in 0..=self.geometry.sectors {
            match self.unit(sector)?.next {
                NOT_ALLOCATED => return Ok(sector),
                next => sector = next,
            }
        }
        error!("chain from {} does not terminate", root);
        Err(Error::FilesystemCorrupted)
    }

    /// Calls `f` for every unit of the chain starting at `root`, in order.
    pub fn walk_chain(
        &mut self,
        root: u8,
        mut f: impl FnMut(&mut Self, u8) -> Result<()>,
    ) -> Result<()> {
        let mut sector = root;
        for _ in 0..=self.geometry.sectors {
            let next = self.unit(sector)?.next;
            f(self, sector)?;
            if next == NOT_ALLOCATED {
                return Ok(());
            }
            sector = next;
        }
        error!("chain from {} does not terminate", root);
        Err(Error::FilesystemCorrupted)
    }

    /// End of the record stream of `sector`.
    ///
    /// Sealed units answer from their header. Otherwise data pages are
    /// replayed until a `0xFFFF` length; a unit without one is full.
    pub fn find_end_of_sector(&mut self, sector: u8) -> Result<Extent> {
        let unit = self.unit(sector)?;
        if unit.is_sealed() {
            return Ok(Extent {
                raw: unit.raw_size,
                user: unit.user_size,
            });
        }

        let page_size = self.geometry.page_size;
        let mut buf = [0u8; MAX_PAGE_SIZE];
        let page = &mut buf[..page_size as usize];
        let mut user = 0;
        for base in (0..self.geometry.usable_size()).step_by(page_size as usize) {
            self.read_data(sector, base, page)?;
            let mut at = 0;
            while at < page_size - 2 {
                let len = record_len(page, at);
                if len == 0xFFFF {
                    return Ok(Extent {
                        raw: base + at,
                        user,
                    });
                }
                if len <= 2 || at + len > page_size {
                    error!("bad record {:x} in unit {} at {:x}", len, sector, base + at);
                    return Err(Error::FilesystemCorrupted);
                }
                at += len;
                user += len - 2;
            }
        }

        Ok(Extent {
            raw: self.geometry.usable_size(),
            user,
        })
    }

    /// Tail unit of the chain and where its record stream ends.
    pub fn find_eof(&mut self, root: u8) -> Result<(u8, Extent)> {
        let tail = self.find_tail(root)?;
        let extent = self.find_end_of_sector(tail)?;
        Ok((tail, extent))
    }
}

/// Length prefix of the record starting at `at`.
pub(crate) fn record_len(page: &[u8], at: u32) -> u32 {
    let at = at as usize;
    u16::from_le_bytes([page[at], page[at + 1]]) as u32
}
