use crate::chain::record_len;
use crate::device::Drive;
use crate::error::{Error, Result};
use crate::flash::FlashDevice;
use crate::geometry::NOT_ALLOCATED;
use crate::handle::OpenFile;

/// Page visits in a row that may yield nothing before the stream is
/// considered corrupted.
const MAX_IDLE_PAGES: u32 = 3;

impl<F: FlashDevice> Drive<'_, F> {
    /// The cursor consumed everything recorded so far and there is no next unit.
    pub fn at_eof(&mut self, file: &OpenFile) -> Result<bool> {
        Ok(file.end <= file.offset && self.unit(file.unit)?.next == NOT_ALLOCATED)
    }

    /// Advance the cursor of `file` by up to `want` payload bytes, copying them
    /// into `out` when given.
    ///
    /// Each page is replayed from its first record so that record boundaries
    /// are re-validated, bytes before the cursor are skipped. Successor units
    /// are resolved only when the cursor reaches them.
    ///
    /// An error after some bytes were delivered is held back: the short count
    /// is returned and the next call, starting where this one stopped, runs
    /// into the error again.
    pub fn scan(&mut self, file: &mut OpenFile, out: Option<&mut [u8]>, want: u32) -> Result<u32> {
        if self.at_eof(file)? {
            return Err(Error::EndOfFile);
        }

        let mut done = 0;
        match self.scan_pages(file, out, want, &mut done) {
            Ok(()) => Ok(done),
            Err(_error) if done > 0 => {
                debug!("short scan {} of {}: {:?}", done, want, _error);
                Ok(done)
            }
            Err(error) => Err(error),
        }
    }

    fn scan_pages(
        &mut self,
        file: &mut OpenFile,
        mut out: Option<&mut [u8]>,
        want: u32,
        done: &mut u32,
    ) -> Result<()> {
        let page_size = self.geometry.page_size;
        let mut idle_pages = 0;
        while *done < want {
            if file.end <= file.offset {
                let next = self.unit(file.unit)?.next;
                if next == NOT_ALLOCATED {
                    break;
                }
                let extent = self.find_end_of_sector(next)?;
                file.unit = next;
                file.offset = 0;
                file.end = extent.raw;
                continue;
            }

            let base = self.geometry.page_start(file.offset);
            if file.loaded != Some((file.unit, base)) {
                file.loaded = None;
                self.read_data(file.unit, base, &mut file.page[..page_size as usize])?;
                file.loaded = Some((file.unit, base));
            }

            let before = *done;
            let mut position = file.offset - base;
            let mut record = 0;
            while record < page_size - 2 && *done < want {
                let len = record_len(&file.page, record);
                if len == 0xFFFF {
                    break;
                }
                if len <= 2 || record + len > page_size {
                    error!("bad record {:x} in unit {} at {:x}", len, file.unit, base + record);
                    return Err(Error::FilesystemCorrupted);
                }
                if record + len > position {
                    let mut available = record + len - position;
                    if position == record {
                        available -= 2;
                        position += 2;
                        file.offset += 2;
                    }
                    let n = core::cmp::min(want - *done, available);
                    if let Some(out) = out.as_deref_mut() {
                        let (from, to) = (position as usize, *done as usize);
                        out[to..to + n as usize].copy_from_slice(&file.page[from..from + n as usize]);
                    }
                    *done += n;
                    position += n;
                    file.offset += n;
                }
                record += len;
            }

            if *done < want {
                // nothing more in this page
                file.offset += page_size - position;
            }

            if *done == before {
                idle_pages += 1;
                if idle_pages == MAX_IDLE_PAGES {
                    error!("no progress in unit {} at {:x}", file.unit, file.offset);
                    return Err(Error::FilesystemCorrupted);
                }
            } else {
                idle_pages = 0;
            }
        }
        Ok(())
    }
}
