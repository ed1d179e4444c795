//! Linear memory.
//!
//! A byte buffer sized in 64 KiB pages, acquired at instantiation and
//! released with the allocator. All access is bounds-checked; an
//! out-of-bounds access is a WebAssembly-level trap, not a host error.
//! Multi-byte accesses are little-endian.

use super::{RuntimeError, Trap};
use byteorder::{ByteOrder, LittleEndian};

/// WebAssembly page size in bytes (64 KiB).
pub const PAGE_SIZE: usize = 65536;

/// Maximum number of pages (4 GiB total).
pub const MAX_PAGES: u32 = 65536;

/// A linear memory instance.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
    pages: u32,
    max_pages: Option<u32>,
}

impl Memory {
    /// Create a memory with the given initial page count and optional
    /// maximum.
    ///
    /// # Errors
    ///
    /// Fails when the initial size exceeds the declared or system maximum.
    pub fn new(initial: u32, max: Option<u32>) -> Result<Self, RuntimeError> {
        if initial > MAX_PAGES {
            return Err(RuntimeError::MemoryError(format!(
                "initial size {} pages exceeds maximum {} pages",
                initial, MAX_PAGES
            )));
        }
        if let Some(max) = max {
            if initial > max {
                return Err(RuntimeError::MemoryError(format!(
                    "initial size {} pages exceeds declared maximum {} pages",
                    initial, max
                )));
            }
        }

        // Zero-initialised, as the execution spec requires.
        Ok(Memory {
            data: vec![0u8; initial as usize * PAGE_SIZE],
            pages: initial,
            max_pages: max,
        })
    }

    /// Current size in pages.
    pub fn size(&self) -> u32 {
        self.pages
    }

    /// Current size in bytes.
    pub fn byte_length(&self) -> usize {
        self.data.len()
    }

    /// Declared maximum in pages, if any.
    pub fn max_pages(&self) -> Option<u32> {
        self.max_pages
    }

    /// Bounds-check an access, returning the usable base offset.
    fn check_bounds(&self, addr: u32, size: usize) -> Result<usize, Trap> {
        let addr = addr as usize;
        let end = addr
            .checked_add(size)
            .ok_or_else(|| Trap::new("out of bounds memory access"))?;
        if end > self.data.len() {
            return Err(Trap::new("out of bounds memory access"));
        }
        Ok(addr)
    }

    pub fn read_i32(&self, addr: u32) -> Result<i32, Trap> {
        let a = self.check_bounds(addr, 4)?;
        Ok(LittleEndian::read_i32(&self.data[a..a + 4]))
    }

    pub fn read_i64(&self, addr: u32) -> Result<i64, Trap> {
        let a = self.check_bounds(addr, 8)?;
        Ok(LittleEndian::read_i64(&self.data[a..a + 8]))
    }

    pub fn read_f32(&self, addr: u32) -> Result<f32, Trap> {
        let a = self.check_bounds(addr, 4)?;
        Ok(LittleEndian::read_f32(&self.data[a..a + 4]))
    }

    pub fn read_f64(&self, addr: u32) -> Result<f64, Trap> {
        let a = self.check_bounds(addr, 8)?;
        Ok(LittleEndian::read_f64(&self.data[a..a + 8]))
    }

    pub fn read_byte(&self, addr: u32) -> Result<u8, Trap> {
        let a = self.check_bounds(addr, 1)?;
        Ok(self.data[a])
    }

    pub fn write_i32(&mut self, addr: u32, value: i32) -> Result<(), Trap> {
        let a = self.check_bounds(addr, 4)?;
        LittleEndian::write_i32(&mut self.data[a..a + 4], value);
        Ok(())
    }

    pub fn write_i64(&mut self, addr: u32, value: i64) -> Result<(), Trap> {
        let a = self.check_bounds(addr, 8)?;
        LittleEndian::write_i64(&mut self.data[a..a + 8], value);
        Ok(())
    }

    pub fn write_f32(&mut self, addr: u32, value: f32) -> Result<(), Trap> {
        let a = self.check_bounds(addr, 4)?;
        LittleEndian::write_f32(&mut self.data[a..a + 4], value);
        Ok(())
    }

    pub fn write_f64(&mut self, addr: u32, value: f64) -> Result<(), Trap> {
        let a = self.check_bounds(addr, 8)?;
        LittleEndian::write_f64(&mut self.data[a..a + 8], value);
        Ok(())
    }

    /// Write a byte slice, used for data-segment initialisation.
    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Trap> {
        let a = self.check_bounds(addr, bytes.len())?;
        self.data[a..a + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
