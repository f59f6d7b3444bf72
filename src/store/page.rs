use crate::errors::{DbError, Result};

/// Magic bytes identifying a TinyDb main file.
pub const MAGIC: [u8; 4] = *b"TDBF";
pub const FORMAT_VERSION: u16 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

pub const MIN_PAGE_SIZE: u32 = 512;
pub const MAX_PAGE_SIZE: u32 = 65536;

/// Sentinel meaning "no page" in a page-id field (page id 0 is the header
/// page and is never a valid sibling/free-list/catalog-root target).
pub const NONE_PAGE: u32 = 0;

/// Page kinds, stored as the first 4 bytes of every non-header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PageType {
    Free = 0,
    Heap = 1,
    BTreeInternal = 2,
    BTreeLeaf = 3,
    Catalog = 4,
}

impl PageType {
    pub fn from_u32(v: u32) -> Result<Self> {
        Ok(match v {
            0 => PageType::Free,
            1 => PageType::Heap,
            2 => PageType::BTreeInternal,
            3 => PageType::BTreeLeaf,
            4 => PageType::Catalog,
            other => {
                return Err(DbError::FormatError {
                    offset: 0,
                    reason: format!("unknown page type tag {other}"),
                })
            }
        })
    }
}

/// The 20-byte header every non-header page carries, followed by payload and
/// a trailing 4-byte CRC32C (§4.2 of the storage-core specification).
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_type: PageType,
    pub page_id: u32,
    /// Next sibling in a chain (B+tree leaf chain, free list); `NONE_PAGE`
    /// if there is none.
    pub next: u32,
    /// Previous sibling in a chain; `NONE_PAGE` if there is none.
    pub prev: u32,
    pub entry_count: u16,
    pub free_space_offset: u16,
}

pub const PAGE_HEADER_LEN: usize = 4 + 4 + 4 + 4 + 2 + 2;
pub const PAGE_TRAILER_LEN: usize = 4;

impl PageHeader {
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&(self.page_type as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.page_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.next.to_le_bytes());
        buf[12..16].copy_from_slice(&self.prev.to_le_bytes());
        buf[16..18].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[18..20].copy_from_slice(&self.free_space_offset.to_le_bytes());
    }

    pub fn read_from(buf: &[u8]) -> Result<Self> {
        let page_type = PageType::from_u32(u32::from_le_bytes(buf[0..4].try_into().unwrap()))?;
        Ok(PageHeader {
            page_type,
            page_id: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            next: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            prev: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            entry_count: u16::from_le_bytes(buf[16..18].try_into().unwrap()),
            free_space_offset: u16::from_le_bytes(buf[18..20].try_into().unwrap()),
        })
    }
}

/// One in-memory page: a fixed-size buffer holding header + payload +
/// trailing CRC32C, always exactly `page_size` bytes long.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: Vec<u8>,
}

impl Page {
    pub fn new_zeroed(page_size: u32) -> Self {
        Page {
            data: vec![0u8; page_size as usize],
        }
    }

    pub fn header(&self) -> Result<PageHeader> {
        PageHeader::read_from(&self.data)
    }

    pub fn set_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    pub fn payload(&self) -> &[u8] {
        let end = self.data.len() - PAGE_TRAILER_LEN;
        &self.data[PAGE_HEADER_LEN..end]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let end = self.data.len() - PAGE_TRAILER_LEN;
        &mut self.data[PAGE_HEADER_LEN..end]
    }

    /// Recomputes and stores the trailing CRC32C over everything but the
    /// trailer itself.
    pub fn finalize_crc(&mut self) {
        let len = self.data.len();
        let crc = crc32c::crc32c(&self.data[..len - PAGE_TRAILER_LEN]);
        self.data[len - PAGE_TRAILER_LEN..].copy_from_slice(&crc.to_le_bytes());
    }

    /// Verifies the trailing CRC32C against the page's current contents.
    pub fn verify_crc(&self) -> bool {
        let len = self.data.len();
        let stored = u32::from_le_bytes(self.data[len - PAGE_TRAILER_LEN..].try_into().unwrap());
        crc32c::crc32c(&self.data[..len - PAGE_TRAILER_LEN]) == stored
    }
}

/// Page 0's layout: magic, format version, page size, free-list head,
/// catalog root, a monotonic generation counter, the byte offset of the
/// shadow copy, and a trailing CRC32C (§4.2). `next_page_id` is an
/// implementation addition beyond the fields §4.2 names explicitly: the
/// store needs some monotonic counter to hand out fresh page ids once the
/// free list is empty, and the header page is the natural place to persist
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub page_size: u32,
    pub free_list_head: u32,
    pub catalog_root: u32,
    pub generation: u64,
    pub shadow_header_offset: u64,
    pub next_page_id: u32,
}

const HEADER_BODY_LEN: usize = 4 + 2 + 2 + 4 + 4 + 8 + 8 + 4;

impl FileHeader {
    pub fn encode(&self) -> [u8; HEADER_BODY_LEN + 4] {
        let mut buf = [0u8; HEADER_BODY_LEN + 4];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&(self.page_size as u16).to_le_bytes());
        buf[8..12].copy_from_slice(&self.free_list_head.to_le_bytes());
        buf[12..16].copy_from_slice(&self.catalog_root.to_le_bytes());
        buf[16..24].copy_from_slice(&self.generation.to_le_bytes());
        buf[24..32].copy_from_slice(&self.shadow_header_offset.to_le_bytes());
        buf[32..36].copy_from_slice(&self.next_page_id.to_le_bytes());
        let crc = crc32c::crc32c(&buf[..HEADER_BODY_LEN]);
        buf[HEADER_BODY_LEN..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_BODY_LEN + 4 {
            return Err(DbError::FormatError {
                offset: 0,
                reason: "header page too short".into(),
            });
        }
        if buf[0..4] != MAGIC {
            return Err(DbError::FormatError {
                offset: 0,
                reason: "bad magic bytes".into(),
            });
        }
        let crc_stored = u32::from_le_bytes(buf[HEADER_BODY_LEN..HEADER_BODY_LEN + 4].try_into().unwrap());
        if crc32c::crc32c(&buf[..HEADER_BODY_LEN]) != crc_stored {
            return Err(DbError::FormatError {
                offset: HEADER_BODY_LEN as u64,
                reason: "header CRC32C mismatch".into(),
            });
        }
        let format_version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if format_version != FORMAT_VERSION {
            return Err(DbError::FormatError {
                offset: 4,
                reason: format!("unsupported format version {format_version}"),
            });
        }
        Ok(FileHeader {
            page_size: u16::from_le_bytes(buf[6..8].try_into().unwrap()) as u32,
            free_list_head: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            catalog_root: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            generation: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            shadow_header_offset: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            next_page_id: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_round_trips() {
        let h = FileHeader {
            page_size: 4096,
            free_list_head: 7,
            catalog_root: 3,
            generation: 42,
            shadow_header_offset: 4096,
            next_page_id: 9,
        };
        let bytes = h.encode();
        let back = FileHeader::decode(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn file_header_detects_crc_corruption() {
        let h = FileHeader {
            page_size: 4096,
            free_list_head: 0,
            catalog_root: 0,
            generation: 0,
            shadow_header_offset: 4096,
            next_page_id: 1,
        };
        let mut bytes = h.encode();
        bytes[8] ^= 0xFF;
        assert!(FileHeader::decode(&bytes).is_err());
    }

    #[test]
    fn page_crc_detects_corruption() {
        let mut page = Page::new_zeroed(DEFAULT_PAGE_SIZE);
        page.set_header(&PageHeader {
            page_type: PageType::Heap,
            page_id: 1,
            next: NONE_PAGE,
            prev: NONE_PAGE,
            entry_count: 0,
            free_space_offset: 0,
        });
        page.finalize_crc();
        assert!(page.verify_crc());
        page.payload_mut()[0] ^= 0xFF;
        assert!(!page.verify_crc());
    }
}
