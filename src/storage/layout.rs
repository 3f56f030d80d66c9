//! Element placement inside a data page.
//!
//! Elements are packed from the start of the page. When null bits are
//! enabled, a bitmap of 64-bit words follows the last element slot.

use crate::primitives::bytes::le;
use crate::types::PAGE_SIZE;

const NULL_ENTRY_BITS: usize = 64;
const NULL_ENTRY_BYTES: usize = NULL_ENTRY_BITS / 8;

/// Position of an element as `(logical page, slot within page)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageElementCursor {
    /// Logical page within the list's page run.
    pub page_idx: u32,
    /// Slot within that page.
    pub pos_in_page: u32,
}

impl PageElementCursor {
    /// Moves to the first slot of the following logical page.
    pub fn next_page(&mut self) {
        self.page_idx += 1;
        self.pos_in_page = 0;
    }
}

/// Pure page arithmetic for one element size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageElementLayout {
    element_size: usize,
    has_null_bits: bool,
    elements_per_page: u32,
    null_mask_offset: usize,
}

impl PageElementLayout {
    /// Layout for `element_size`-byte elements, optionally with null bits.
    pub fn new(element_size: usize, has_null_bits: bool) -> Self {
        assert!(
            element_size > 0 && element_size <= PAGE_SIZE / 2,
            "element size {element_size} does not fit a page twice"
        );
        let null_entries = if has_null_bits {
            PAGE_SIZE.div_ceil(element_size * NULL_ENTRY_BITS + NULL_ENTRY_BYTES)
        } else {
            0
        };
        let elements_per_page = (PAGE_SIZE - null_entries * NULL_ENTRY_BYTES) / element_size;
        Self {
            element_size,
            has_null_bits,
            elements_per_page: elements_per_page as u32,
            null_mask_offset: elements_per_page * element_size,
        }
    }

    /// Bytes per element.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Whether a null bitmap trails the elements.
    pub fn has_null_bits(&self) -> bool {
        self.has_null_bits
    }

    /// Elements that fit one page.
    pub fn elements_per_page(&self) -> u32 {
        self.elements_per_page
    }

    /// Pages needed to hold `num_elements` contiguous elements.
    pub fn pages_for(&self, num_elements: u64) -> u32 {
        num_elements.div_ceil(u64::from(self.elements_per_page)) as u32
    }

    /// Cursor for the element at absolute position `pos` of a page run.
    pub fn cursor_for(&self, pos: u64) -> PageElementCursor {
        let per_page = u64::from(self.elements_per_page);
        PageElementCursor {
            page_idx: (pos / per_page) as u32,
            pos_in_page: (pos % per_page) as u32,
        }
    }

    /// Byte range of slot `pos_in_page`.
    pub fn element_range(&self, pos_in_page: u32) -> std::ops::Range<usize> {
        let start = pos_in_page as usize * self.element_size;
        start..start + self.element_size
    }

    /// Reads slot `pos_in_page`'s null bit. Always false without null bits.
    pub fn is_null(&self, page: &[u8], pos_in_page: u32) -> bool {
        if !self.has_null_bits {
            return false;
        }
        let (word_off, bit) = self.null_word(pos_in_page);
        le::get_u64(page, word_off) & (1 << bit) != 0
    }

    /// Sets or clears slot `pos_in_page`'s null bit.
    pub fn set_null(&self, page: &mut [u8], pos_in_page: u32, null: bool) {
        if !self.has_null_bits {
            return;
        }
        let (word_off, bit) = self.null_word(pos_in_page);
        let word = le::get_u64(page, word_off);
        let word = if null { word | (1 << bit) } else { word & !(1 << bit) };
        le::put_u64(page, word_off, word);
    }

    fn null_word(&self, pos_in_page: u32) -> (usize, u32) {
        let pos = pos_in_page as usize;
        (
            self.null_mask_offset + (pos / NULL_ENTRY_BITS) * NULL_ENTRY_BYTES,
            (pos % NULL_ENTRY_BITS) as u32,
        )
    }
}
