//! SQL Server 8 KiB page layout: the 96-byte header, the slot array, and
//! the record status bits.
//!
//! Header offsets hold for SQL Server 2005 through 2022 pages:
//!
//! ```text
//!   0x00: header_version (1)    0x01: type (1)
//!   0x02: type_flag_bits (1)    0x03: level (1)
//!   0x04: flag_bits (2)         0x06: index_id (2)
//!   0x08: prev_page (4)         0x0C: prev_file (2)
//!   0x0E: pminlen (2)
//!   0x10: next_page (4)         0x14: next_file (2)
//!   0x16: slot_count (2)
//!   0x18: obj_id (4)
//!   0x1C: free_count (2)        0x1E: free_data (2)
//!   0x20: this_page (4)         0x24: this_file (2)
//!   0x26: reserved_count (2)
//!   0x28: lsn (4+4+2)           0x32: xact_reserved (2)
//!   0x34: xdes_id (4+4)         0x3C: ghost_rec_count (2)
//!   0x3E: torn_bits (2)
//! ```

use crate::bytes::{u16_at, u32_at};

/// Size of one page image.
pub const PAGE_SIZE: usize = 8192;
/// Size of the fixed page header.
pub const PAGE_HEADER_SIZE: usize = 96;
/// Bytes available for records and the slot array.
pub const PAGE_DATA_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Page type from the header `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageType {
    Data = 1,
    Index = 2,
    TextMix = 3,
    TextTree = 4,
    Sort = 7,
    Gam = 8,
    Sgam = 9,
    Iam = 10,
    Pfs = 11,
    Boot = 13,
    FileHeader = 15,
    DiffMap = 16,
    MlMap = 17,
}

impl PageType {
    /// Map a raw header byte to a known page type.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => Self::Data,
            2 => Self::Index,
            3 => Self::TextMix,
            4 => Self::TextTree,
            7 => Self::Sort,
            8 => Self::Gam,
            9 => Self::Sgam,
            10 => Self::Iam,
            11 => Self::Pfs,
            13 => Self::Boot,
            15 => Self::FileHeader,
            16 => Self::DiffMap,
            17 => Self::MlMap,
            _ => return None,
        })
    }
}

/// Record status bits — first byte of every record on a data page.
///
/// The low three bits are the record kind; the remaining bits are flags.
pub struct RecordStatus;

impl RecordStatus {
    pub const HAS_NULL_BITMAP: u8 = 0x10;
    pub const HAS_VAR_COLUMNS: u8 = 0x20;
    pub const HAS_VERSION_TAG: u8 = 0x40;
    pub const TYPE_MASK: u8 = 0x07;
    pub const PRIMARY_RECORD: u8 = 0x00;
    pub const FORWARDED: u8 = 0x01;
    pub const FORWARDING_STUB: u8 = 0x02;
    pub const INDEX_RECORD: u8 = 0x06;
}

/// A page address: `(file_id, page_id)` with `file_id >= 1`.
///
/// File 1 is the primary data file; it uniquely holds the boot page at
/// page id 9.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct PageId {
    pub file_id: i32,
    pub page_id: i32,
}

impl PageId {
    /// The boot page address, `(1, 9)`.
    pub const BOOT: Self = Self {
        file_id: 1,
        page_id: 9,
    };

    #[must_use]
    pub const fn new(file_id: i32, page_id: i32) -> Self {
        Self { file_id, page_id }
    }

    /// Null page reference (used as a chain terminator in page links).
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.file_id == 0 && self.page_id == 0
    }

    /// The 64-bit compound key `(file_id << 32) | page_id`.
    #[must_use]
    pub const fn key(self) -> i64 {
        page_key(self.file_id, self.page_id)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}:{})", self.file_id, self.page_id)
    }
}

/// Build the compound page key `(file_id << 32) | page_id`.
#[inline]
#[must_use]
pub const fn page_key(file_id: i32, page_id: i32) -> i64 {
    ((file_id as i64) << 32) | (page_id as u32 as i64)
}

/// Split a compound page key back into `(file_id, page_id)`.
#[inline]
#[must_use]
pub const fn split_page_key(key: i64) -> PageId {
    PageId {
        file_id: (key >> 32) as i32,
        page_id: key as i32,
    }
}

/// Slot array entry `i`: the 2-byte record offset stored at
/// `PAGE_SIZE - 2 * (i + 1)`. The array grows backward from the page end.
#[inline]
#[must_use]
pub fn slot_offset(page: &[u8], slot: usize) -> Option<u16> {
    let pos = PAGE_SIZE.checked_sub(2 * (slot + 1))?;
    u16_at(page, pos)
}

/// Decoded 96-byte page header.
///
/// LSN and transaction fields are carried but never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub header_version: u8,
    pub page_type: u8,
    pub type_flag_bits: u8,
    /// B-tree level; 0 = leaf.
    pub level: u8,
    pub flag_bits: u16,
    pub index_id: u16,
    pub prev_page: u32,
    pub prev_file: u16,
    /// Minimum record length.
    pub pminlen: u16,
    pub next_page: u32,
    pub next_file: u16,
    pub slot_count: u16,
    /// The allocation-unit stamp this page belongs to.
    pub obj_id: u32,
    pub free_count: u16,
    pub free_data: u16,
    pub this_page: u32,
    pub this_file: u16,
    pub reserved_count: u16,
    pub lsn_file: u32,
    pub lsn_offset: u32,
    pub lsn_slot: u16,
    pub xact_reserved: u16,
    pub xdes_id_1: u32,
    pub xdes_id_2: u32,
    pub ghost_rec_count: u16,
    pub torn_bits: u16,
}

impl PageHeader {
    /// Parse a header from the first 96 bytes of a page image.
    ///
    /// Returns `None` only when the buffer is too short; all value checks
    /// are left to [`PageHeader::is_plausible`].
    #[must_use]
    pub fn parse(page: &[u8]) -> Option<Self> {
        if page.len() < PAGE_HEADER_SIZE {
            return None;
        }
        Some(Self {
            header_version: page[0x00],
            page_type: page[0x01],
            type_flag_bits: page[0x02],
            level: page[0x03],
            flag_bits: u16_at(page, 0x04)?,
            index_id: u16_at(page, 0x06)?,
            prev_page: u32_at(page, 0x08)?,
            prev_file: u16_at(page, 0x0C)?,
            pminlen: u16_at(page, 0x0E)?,
            next_page: u32_at(page, 0x10)?,
            next_file: u16_at(page, 0x14)?,
            slot_count: u16_at(page, 0x16)?,
            obj_id: u32_at(page, 0x18)?,
            free_count: u16_at(page, 0x1C)?,
            free_data: u16_at(page, 0x1E)?,
            this_page: u32_at(page, 0x20)?,
            this_file: u16_at(page, 0x24)?,
            reserved_count: u16_at(page, 0x26)?,
            lsn_file: u32_at(page, 0x28)?,
            lsn_offset: u32_at(page, 0x2C)?,
            lsn_slot: u16_at(page, 0x30)?,
            xact_reserved: u16_at(page, 0x32)?,
            xdes_id_1: u32_at(page, 0x34)?,
            xdes_id_2: u32_at(page, 0x38)?,
            ghost_rec_count: u16_at(page, 0x3C)?,
            torn_bits: u16_at(page, 0x3E)?,
        })
    }

    /// The candidate-page predicate used during the scan phase.
    ///
    /// A window is treated as a real page only when every check passes;
    /// arbitrary backup-stream bytes fail at least one with overwhelming
    /// probability.
    #[must_use]
    pub const fn is_plausible(&self) -> bool {
        self.header_version == 1
            && self.page_type >= 1
            && self.page_type <= 17
            && self.this_file >= 1
            && self.this_file <= 32
            && self.slot_count <= 1000
            && self.free_count <= PAGE_SIZE as u16
            && (self.this_page != 0 || self.this_file != 0)
    }

    /// This page's own address.
    #[must_use]
    pub const fn page_id(&self) -> PageId {
        PageId {
            file_id: self.this_file as i32,
            page_id: self.this_page as i32,
        }
    }

    /// The forward page link.
    #[must_use]
    pub const fn next(&self) -> PageId {
        PageId {
            file_id: self.next_file as i32,
            page_id: self.next_page as i32,
        }
    }

    /// The backward page link.
    #[must_use]
    pub const fn prev(&self) -> PageId {
        PageId {
            file_id: self.prev_file as i32,
            page_id: self.prev_page as i32,
        }
    }

    /// Typed page type, if the raw byte is a known value.
    #[must_use]
    pub const fn typed(&self) -> Option<PageType> {
        PageType::from_raw(self.page_type)
    }

    /// Whether this is a user/system data page.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        self.page_type == PageType::Data as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal plausible header in an 8 KiB buffer.
    fn sample_page() -> Vec<u8> {
        let mut p = vec![0u8; PAGE_SIZE];
        p[0x00] = 1; // header_version
        p[0x01] = 1; // type = Data
        p[0x03] = 0; // level
        p[0x16..0x18].copy_from_slice(&2u16.to_le_bytes()); // slot_count
        p[0x18..0x1C].copy_from_slice(&97u32.to_le_bytes()); // obj_id
        p[0x1C..0x1E].copy_from_slice(&100u16.to_le_bytes()); // free_count
        p[0x20..0x24].copy_from_slice(&42u32.to_le_bytes()); // this_page
        p[0x24..0x26].copy_from_slice(&1u16.to_le_bytes()); // this_file
        p
    }

    #[test]
    fn parse_round_trip() {
        let page = sample_page();
        let hdr = PageHeader::parse(&page).unwrap();
        assert_eq!(hdr.header_version, 1);
        assert_eq!(hdr.page_type, 1);
        assert_eq!(hdr.slot_count, 2);
        assert_eq!(hdr.obj_id, 97);
        assert_eq!(hdr.page_id(), PageId::new(1, 42));
        assert!(hdr.is_plausible());
        assert!(hdr.is_data());
        assert_eq!(hdr.typed(), Some(PageType::Data));
    }

    #[test]
    fn parse_rejects_short_buffer() {
        assert!(PageHeader::parse(&[0u8; 95]).is_none());
        assert!(PageHeader::parse(&[]).is_none());
    }

    #[test]
    fn plausibility_gates() {
        let mut page = sample_page();

        page[0x00] = 2; // wrong format version
        assert!(!PageHeader::parse(&page).unwrap().is_plausible());
        page[0x00] = 1;

        page[0x01] = 18; // page type out of range
        assert!(!PageHeader::parse(&page).unwrap().is_plausible());
        page[0x01] = 0;
        assert!(!PageHeader::parse(&page).unwrap().is_plausible());
        page[0x01] = 1;

        page[0x24..0x26].copy_from_slice(&33u16.to_le_bytes()); // file out of range
        assert!(!PageHeader::parse(&page).unwrap().is_plausible());
        page[0x24..0x26].copy_from_slice(&0u16.to_le_bytes());
        assert!(!PageHeader::parse(&page).unwrap().is_plausible());
        page[0x24..0x26].copy_from_slice(&1u16.to_le_bytes());

        page[0x16..0x18].copy_from_slice(&1001u16.to_le_bytes()); // too many slots
        assert!(!PageHeader::parse(&page).unwrap().is_plausible());
        page[0x16..0x18].copy_from_slice(&1000u16.to_le_bytes());
        assert!(PageHeader::parse(&page).unwrap().is_plausible());

        page[0x1C..0x1E].copy_from_slice(&8193u16.to_le_bytes()); // free_count
        assert!(!PageHeader::parse(&page).unwrap().is_plausible());
    }

    #[test]
    fn all_zero_window_is_not_a_page() {
        let page = vec![0u8; PAGE_SIZE];
        assert!(!PageHeader::parse(&page).unwrap().is_plausible());
    }

    #[test]
    fn compound_key_round_trip() {
        let cases = [
            PageId::new(1, 9),
            PageId::new(1, 0),
            PageId::new(32, i32::MAX),
            PageId::new(3, 123_456_789),
        ];
        for id in cases {
            assert_eq!(split_page_key(id.key()), id, "round trip for {id}");
        }
        // page_id occupies the low 32 bits untouched
        assert_eq!(page_key(1, 9), 0x1_0000_0009);
        assert_eq!(page_key(2, -1), 0x2_FFFF_FFFF);
    }

    #[test]
    fn slot_array_grows_backward() {
        let mut page = sample_page();
        page[PAGE_SIZE - 2..].copy_from_slice(&96u16.to_le_bytes()); // slot 0
        page[PAGE_SIZE - 4..PAGE_SIZE - 2].copy_from_slice(&200u16.to_le_bytes()); // slot 1
        assert_eq!(slot_offset(&page, 0), Some(96));
        assert_eq!(slot_offset(&page, 1), Some(200));
        assert_eq!(slot_offset(&page, 2), Some(0));
        assert_eq!(slot_offset(&page, PAGE_SIZE), None);
    }

    #[test]
    fn page_links() {
        let mut page = sample_page();
        page[0x10..0x14].copy_from_slice(&77u32.to_le_bytes()); // next_page
        page[0x14..0x16].copy_from_slice(&1u16.to_le_bytes()); // next_file
        let hdr = PageHeader::parse(&page).unwrap();
        assert_eq!(hdr.next(), PageId::new(1, 77));
        assert!(hdr.prev().is_null());
    }
}
