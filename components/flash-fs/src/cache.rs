use crate::device::Drive;
use crate::error::Result;
use crate::flash::FlashDevice;
use crate::handle::OpenFile;

/// Smallest record: the length prefix alone.
const RECORD_HEADER: u32 = 2;

impl<F: FlashDevice> Drive<'_, F> {
    /// Program the open record, if any. Trailing page bytes stay erased.
    pub fn flush_cache(&mut self, file: &mut OpenFile) -> Result<()> {
        let cached = file.cached() as usize;
        if cached > 0 {
            self.write_data(file.unit, file.end, &file.page[..cached])?;
            file.end = file.offset;
        }
        Ok(())
    }

    /// Append as much of `data` to the open record as fits before the next
    /// page boundary, programming the record once it reaches the boundary.
    ///
    /// The cache starts at `file.end` and never extends past the page that
    /// contains it. Returns the number of bytes taken. Taken bytes count even
    /// when programming the page fails; the error is reported once a call
    /// takes nothing.
    pub fn write_through_cache(&mut self, file: &mut OpenFile, data: &[u8]) -> Result<usize> {
        let geometry = self.geometry;
        if file.offset >= geometry.usable_size() {
            self.flush_cache(file)?;
            self.allocate_unit(file)?;
        }

        let mut cached = file.cached();
        if cached == 0 {
            // a record needs at least one payload byte after its length
            let remaining = geometry.page_remaining(file.offset);
            if remaining <= RECORD_HEADER {
                file.end += remaining;
                file.offset = file.end;
            }
            if geometry.usable_size() - file.offset <= RECORD_HEADER {
                self.allocate_unit(file)?;
            }
            file.page.fill(0xFF);
            cached = RECORD_HEADER;
            file.offset += RECORD_HEADER;
        }

        let boundary = geometry.page_remaining(file.end);
        debug_assert!(cached <= boundary);
        let take = core::cmp::min(boundary - cached, data.len() as u32);
        let start = cached as usize;
        file.page[start..start + take as usize].copy_from_slice(&data[..take as usize]);
        cached += take;
        file.offset += take;
        file.user_size += take;
        file.page[..2].copy_from_slice(&(cached as u16).to_le_bytes());

        if cached == boundary {
            match self.write_data(file.unit, file.end, &file.page[..boundary as usize]) {
                Ok(()) => file.end += boundary,
                // the record stays cached, the next call programs it again
                Err(_error) if take > 0 => {
                    warn!("unit {} at {:x}: deferred {:?}", file.unit, file.end, _error);
                }
                Err(error) => return Err(error),
            }
        }
        Ok(take as usize)
    }
}
