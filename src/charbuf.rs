//! The character buffer behind `args_get`/`environ_get`.
//!
//! An ordered list of NUL-free strings, encoded into guest memory as a
//! 32-bit pointer array plus a packed blob of NUL-terminated strings. The
//! i-th pointer equals the blob pointer plus the string's offset within the
//! blob.
//!
//! ## Authors
//!
//! The wasi-host Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE.md` file in the wasi-host root directory for
//! information on licensing and copyright.

use crate::memory;
use crate::types::{Ptr, Size, PTR_SIZE};

#[derive(Debug, Clone, Default)]
pub(crate) struct CharBuffer(Vec<String>);

impl CharBuffer {
    pub fn new(strings: Vec<String>) -> CharBuffer {
        CharBuffer(strings)
    }

    /// Number of elements.
    pub fn count(&self) -> Size {
        self.0.len() as Size
    }

    /// Size of the packed blob, NUL terminators included.
    pub fn size(&self) -> Size {
        self.0.iter().map(|s| s.len() as Size + 1).sum()
    }

    /// Writes the element count at `count_ptr` and the blob size at
    /// `size_ptr`. Bounds must have been ensured for both words.
    pub fn write_sizes(&self, data: &mut [u8], count_ptr: Ptr, size_ptr: Ptr) {
        memory::write_u32(data, count_ptr, self.count());
        memory::write_u32(data, size_ptr, self.size());
    }

    /// Writes the pointer array at `list_ptr` and the packed blob at
    /// `buf_ptr`. Bounds must have been ensured for the whole array and the
    /// whole blob, so the encoding cannot fault halfway through.
    pub fn write(&self, data: &mut [u8], list_ptr: Ptr, buf_ptr: Ptr) {
        let mut offset: Size = 0;
        for (i, s) in self.0.iter().enumerate() {
            memory::write_u32(data, list_ptr + i as Size * PTR_SIZE, buf_ptr + offset);
            let at = (buf_ptr + offset) as usize;
            data[at..at + s.len()].copy_from_slice(s.as_bytes());
            data[at + s.len()] = 0;
            offset += s.len() as Size + 1;
        }
    }
}
