use crate::geometry::{NOT_ALLOCATED, UNSET};

pub(crate) const HEADER_LEN: usize = 16;
/// Everything but the wear counter, which is only written after an erase.
pub(crate) const INFO_LEN: usize = 12;

pub(crate) const PROTECT_OFFSET: u32 = 1;
pub(crate) const WEAR_OFFSET: u32 = 12;

/// Mode bit persisted in the header; the other mode bits only live in handles.
pub(crate) const MODE_CIRCULAR: u8 = 0x02;

/// Decoded allocation unit header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnitHeader {
    pub file_id: u8,
    pub protect_bits: u8,
    pub next: u8,
    /// Low nibble of the flags byte.
    pub mode_flags: u8,
    /// High nibble of the flags byte.
    pub user_flags: u8,
    pub raw_size: u32,
    pub user_size: u32,
    pub wear_counter: u32,
}

impl UnitHeader {
    /// Header as read from freshly erased flash.
    pub const ERASED: Self = Self {
        file_id: NOT_ALLOCATED,
        protect_bits: 0xFF,
        next: NOT_ALLOCATED,
        mode_flags: 0x0F,
        user_flags: 0x0F,
        raw_size: UNSET,
        user_size: UNSET,
        wear_counter: UNSET,
    };

    pub fn from_bytes(raw: &[u8; HEADER_LEN]) -> Self {
        let word = |at: usize| {
            u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
        };
        Self {
            file_id: raw[0],
            protect_bits: raw[1],
            next: raw[2],
            mode_flags: raw[3] & 0x0F,
            user_flags: raw[3] >> 4,
            raw_size: word(4),
            user_size: word(8),
            wear_counter: word(12),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut raw = [0xFF; HEADER_LEN];
        raw[0] = self.file_id;
        raw[1] = self.protect_bits;
        raw[2] = self.next;
        raw[3] = (self.mode_flags & 0x0F) | (self.user_flags << 4);
        raw[4..8].copy_from_slice(&self.raw_size.to_le_bytes());
        raw[8..12].copy_from_slice(&self.user_size.to_le_bytes());
        raw[12..16].copy_from_slice(&self.wear_counter.to_le_bytes());
        raw
    }

    pub fn is_free(&self) -> bool {
        self.file_id == NOT_ALLOCATED
    }

    /// Never erased since manufacture.
    pub fn is_virgin(&self) -> bool {
        self.wear_counter == UNSET
    }

    /// Sizes are persisted once a successor has been linked.
    pub fn is_sealed(&self) -> bool {
        self.raw_size != UNSET
    }

    pub fn is_protected(&self) -> bool {
        is_protected(self.protect_bits)
    }

    pub fn is_circular(&self) -> bool {
        self.mode_flags & MODE_CIRCULAR != 0
    }
}

/// Protection is the parity of the set bits, so it can be toggled by
/// clearing one more bit without erasing the sector.
pub(crate) fn is_protected(bits: u8) -> bool {
    bits.count_ones() % 2 == 1
}

pub(crate) fn set_protected(bits: u8, protect: bool) -> u8 {
    if is_protected(bits) == protect {
        bits
    } else {
        bits & bits.wrapping_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn erased_header_decodes_as_free_virgin() {
        let header = UnitHeader::from_bytes(&[0xFF; HEADER_LEN]);
        assert_eq!(header, UnitHeader::ERASED);
        assert!(header.is_free());
        assert!(header.is_virgin());
        assert!(!header.is_sealed());
        assert!(!header.is_protected());
    }

    #[test]
    fn flags_byte_packs_mode_low_user_high() {
        let header = UnitHeader {
            mode_flags: MODE_CIRCULAR,
            user_flags: 0x0A,
            ..UnitHeader::ERASED
        };
        assert_eq!(header.to_bytes()[3], 0xA2);
        assert!(header.is_circular());
    }

    #[test]
    fn protect_toggles_until_bits_run_out() {
        let mut bits = 0xFF;
        for _ in 0..4 {
            bits = set_protected(bits, true);
            assert!(is_protected(bits));
            assert_eq!(set_protected(bits, true), bits);
            bits = set_protected(bits, false);
            assert!(!is_protected(bits));
        }
        assert_eq!(bits, 0);
        assert_eq!(set_protected(bits, true), 0);
    }

    quickcheck::quickcheck! {
        fn header_bytes_survive_decoding(raw: Vec<u8>) -> bool {
            let mut bytes = [0xFF; HEADER_LEN];
            for (byte, value) in bytes.iter_mut().zip(raw) {
                *byte = value;
            }
            UnitHeader::from_bytes(&bytes).to_bytes() == bytes
        }

        fn protecting_only_clears_bits(bits: u8, protect: bool) -> bool {
            let next = set_protected(bits, protect);
            next & bits == next && (bits == 0 || is_protected(next) == protect)
        }
    }
}
