//! Guest address space access
//!
//! The renderer never holds pointers into guest memory. Wave data, ADPCM
//! coefficient tables, aux ring buffers and performance entries are all
//! reached through [`GuestMemory`] by address, one bounded block at a time.

use std::ops::Range;
use std::sync::RwLock;

use byteorder::{ByteOrder, LittleEndian};
use bytemuck::Pod;

use crate::error::MemoryError;

/// Block access to the emulated address space.
///
/// Shared between the host thread (command generation) and the ADSP
/// thread (command list processing), hence `Send + Sync`.
pub trait GuestMemory: Send + Sync {
    /// Copy `dst.len()` bytes starting at `address` into `dst`
    fn read_block(&self, address: u64, dst: &mut [u8]) -> Result<(), MemoryError>;

    /// Copy `src` into guest memory starting at `address`
    fn write_block(&self, address: u64, src: &[u8]) -> Result<(), MemoryError>;
}

/// Typed helpers layered over [`GuestMemory`].
///
/// All multi-byte values in guest memory are little-endian.
pub trait GuestMemoryExt: GuestMemory {
    /// Read a plain-old-data struct
    fn read_pod<T: Pod>(&self, address: u64) -> Result<T, MemoryError> {
        let mut value = T::zeroed();
        self.read_block(address, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Write a plain-old-data struct
    fn write_pod<T: Pod>(&self, address: u64, value: &T) -> Result<(), MemoryError> {
        self.write_block(address, bytemuck::bytes_of(value))
    }

    fn read_u32(&self, address: u64) -> Result<u32, MemoryError> {
        let mut bytes = [0u8; 4];
        self.read_block(address, &mut bytes)?;
        Ok(LittleEndian::read_u32(&bytes))
    }

    fn write_u32(&self, address: u64, value: u32) -> Result<(), MemoryError> {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.write_block(address, &bytes)
    }

    /// Read `dst.len()` consecutive i16 samples
    fn read_i16s(&self, address: u64, dst: &mut [i16]) -> Result<(), MemoryError> {
        let mut bytes = vec![0u8; dst.len() * 2];
        self.read_block(address, &mut bytes)?;
        LittleEndian::read_i16_into(&bytes, dst);
        Ok(())
    }

    /// Read `dst.len()` consecutive i32 samples
    fn read_i32s(&self, address: u64, dst: &mut [i32]) -> Result<(), MemoryError> {
        let mut bytes = vec![0u8; dst.len() * 4];
        self.read_block(address, &mut bytes)?;
        LittleEndian::read_i32_into(&bytes, dst);
        Ok(())
    }

    /// Write consecutive i32 samples
    fn write_i32s(&self, address: u64, src: &[i32]) -> Result<(), MemoryError> {
        let mut bytes = vec![0u8; src.len() * 4];
        LittleEndian::write_i32_into(src, &mut bytes);
        self.write_block(address, &bytes)
    }
}

impl<M: GuestMemory + ?Sized> GuestMemoryExt for M {}

/// A flat, contiguous guest arena mapped at `base`.
///
/// Stands in for the emulated address space when the renderer runs
/// headless and in tests. Address 0 is never mapped.
pub struct SharedMemory {
    base: u64,
    data: RwLock<Vec<u8>>,
}

impl SharedMemory {
    /// Map `size` zeroed bytes at `base`
    pub fn new(base: u64, size: usize) -> Self {
        debug_assert!(base != 0, "address 0 is reserved for null");
        Self {
            base,
            data: RwLock::new(vec![0; size]),
        }
    }

    /// First mapped address
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Mapped size in bytes
    pub fn size(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn range(&self, address: u64, len: usize, mapped: usize) -> Result<Range<usize>, MemoryError> {
        if address == 0 {
            return Err(MemoryError::NullAddress);
        }
        let unmapped = MemoryError::Unmapped { address, len };
        let start = address.checked_sub(self.base).ok_or(unmapped.clone())? as usize;
        let end = start.checked_add(len).ok_or(unmapped.clone())?;
        if end > mapped {
            return Err(unmapped);
        }
        Ok(start..end)
    }
}

impl GuestMemory for SharedMemory {
    fn read_block(&self, address: u64, dst: &mut [u8]) -> Result<(), MemoryError> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let range = self.range(address, dst.len(), data.len())?;
        dst.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write_block(&self, address: u64, src: &[u8]) -> Result<(), MemoryError> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let range = self.range(address, src.len(), data.len())?;
        data[range].copy_from_slice(src);
        Ok(())
    }
}
