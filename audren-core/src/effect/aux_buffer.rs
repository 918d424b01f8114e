//! Aux send/return rings in guest memory
//!
//! Each ring is an array of `count_max` i32 samples preceded by an
//! [`AuxInfoDsp`] header holding the read and write cursors. The renderer
//! writes the send ring and reads the return ring; the guest does the
//! opposite.

use bytemuck::{Pod, Zeroable};
use tracing::{error, warn};

use crate::memory::{GuestMemory, GuestMemoryExt};

/// Cursor header in front of an aux ring
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct AuxInfoDsp {
    pub read_offset: u32,
    pub write_offset: u32,
    pub lost_sample_count: u32,
    pub total_sample_count: u32,
    reserved: [u32; 12],
}

impl AuxInfoDsp {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Zero both cursors of the ring whose header is at `info_address`
pub fn reset_aux_info(memory: &dyn GuestMemory, info_address: u64) {
    if info_address == 0 {
        return;
    }
    if let Err(e) = memory.write_pod(info_address, &AuxInfoDsp::default()) {
        warn!("Failed to reset aux info at {:#x}: {}", info_address, e);
    }
}

/// Write `input[..write_count]` into the send ring.
///
/// Samples land `write_offset` samples past the ring's write cursor and
/// wrap at `count_max`. The cursor moves by `update_count` when that is
/// non-zero. Returns the samples written, 0 on any failure.
#[allow(clippy::too_many_arguments)]
pub fn write_aux_buffer(
    memory: &dyn GuestMemory,
    info_address: u64,
    buffer_address: u64,
    count_max: u32,
    input: &[i32],
    write_count: u32,
    write_offset: u32,
    update_count: u32,
) -> u32 {
    if count_max == 0 || info_address == 0 || buffer_address == 0 {
        return 0;
    }
    if write_count > count_max || write_count as usize > input.len() {
        error!(
            "Aux write count {} exceeds the ring size {}",
            write_count, count_max
        );
        return 0;
    }

    let mut info: AuxInfoDsp = match memory.read_pod(info_address) {
        Ok(info) => info,
        Err(e) => {
            warn!("Failed to read aux send info: {}", e);
            return 0;
        }
    };

    let mut target = info.write_offset.wrapping_add(write_offset);
    if target > count_max {
        return 0;
    }

    let mut remaining = write_count;
    let mut read_pos = 0usize;
    while remaining > 0 {
        let to_write = (count_max - target).min(remaining);
        if to_write > 0 {
            let chunk = &input[read_pos..read_pos + to_write as usize];
            if let Err(e) = memory.write_i32s(buffer_address + target as u64 * 4, chunk) {
                warn!("Failed to write aux send buffer: {}", e);
                return 0;
            }
        }
        target = (target + to_write) % count_max;
        remaining -= to_write;
        read_pos += to_write as usize;
    }

    if update_count != 0 {
        info.write_offset = (info.write_offset + update_count) % count_max;
        info.total_sample_count = info.total_sample_count.wrapping_add(update_count);
    }
    if let Err(e) = memory.write_pod(info_address, &info) {
        warn!("Failed to update aux send info: {}", e);
    }
    write_count
}

/// Read `output[..read_count]` from the return ring.
///
/// The mirror of [`write_aux_buffer`], moving the read cursor instead.
#[allow(clippy::too_many_arguments)]
pub fn read_aux_buffer(
    memory: &dyn GuestMemory,
    info_address: u64,
    buffer_address: u64,
    count_max: u32,
    output: &mut [i32],
    read_count: u32,
    read_offset: u32,
    update_count: u32,
) -> u32 {
    if count_max == 0 || info_address == 0 || buffer_address == 0 {
        return 0;
    }
    if read_count > count_max || read_count as usize > output.len() {
        error!(
            "Aux read count {} exceeds the ring size {}",
            read_count, count_max
        );
        return 0;
    }

    let mut info: AuxInfoDsp = match memory.read_pod(info_address) {
        Ok(info) => info,
        Err(e) => {
            warn!("Failed to read aux return info: {}", e);
            return 0;
        }
    };

    let mut target = info.read_offset.wrapping_add(read_offset);
    if target > count_max {
        return 0;
    }

    let mut remaining = read_count;
    let mut write_pos = 0usize;
    while remaining > 0 {
        let to_read = (count_max - target).min(remaining);
        if to_read > 0 {
            let chunk = &mut output[write_pos..write_pos + to_read as usize];
            if let Err(e) = memory.read_i32s(buffer_address + target as u64 * 4, chunk) {
                warn!("Failed to read aux return buffer: {}", e);
                return 0;
            }
        }
        target = (target + to_read) % count_max;
        remaining -= to_read;
        write_pos += to_read as usize;
    }

    if update_count != 0 {
        info.read_offset = (info.read_offset + update_count) % count_max;
    }
    if let Err(e) = memory.write_pod(info_address, &info) {
        warn!("Failed to update aux return info: {}", e);
    }
    read_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SharedMemory;

    const INFO: u64 = 0x1000;
    const RING: u64 = INFO + AuxInfoDsp::SIZE;

    fn memory() -> SharedMemory {
        SharedMemory::new(0x1000, 0x1000)
    }

    #[test]
    fn test_info_layout() {
        assert_eq!(AuxInfoDsp::SIZE, 0x40);
    }

    #[test]
    fn test_write_wraps_and_moves_cursor() {
        let mem = memory();
        mem.write_pod(
            INFO,
            &AuxInfoDsp {
                write_offset: 6,
                ..Default::default()
            },
        )
        .unwrap();

        let written = write_aux_buffer(&mem, INFO, RING, 8, &[1, 2, 3, 4], 4, 0, 4);
        assert_eq!(written, 4);

        let mut ring = [0i32; 8];
        mem.read_i32s(RING, &mut ring).unwrap();
        assert_eq!(ring, [3, 4, 0, 0, 0, 0, 1, 2]);

        let info: AuxInfoDsp = mem.read_pod(INFO).unwrap();
        assert_eq!(info.write_offset, 2);
        assert_eq!(info.total_sample_count, 4);
    }

    #[test]
    fn test_write_offset_without_update_leaves_cursor() {
        let mem = memory();
        write_aux_buffer(&mem, INFO, RING, 8, &[9, 9], 2, 2, 0);
        let mut ring = [0i32; 4];
        mem.read_i32s(RING, &mut ring).unwrap();
        assert_eq!(ring, [0, 0, 9, 9]);
        assert_eq!(mem.read_pod::<AuxInfoDsp>(INFO).unwrap().write_offset, 0);
    }

    #[test]
    fn test_write_rejects_oversized() {
        let mem = memory();
        assert_eq!(write_aux_buffer(&mem, INFO, RING, 2, &[1, 2, 3], 3, 0, 3), 0);
        assert_eq!(write_aux_buffer(&mem, INFO, RING, 8, &[1], 1, 9, 1), 0);
        assert_eq!(write_aux_buffer(&mem, INFO, RING, 0, &[1], 1, 0, 1), 0);
    }

    #[test]
    fn test_read_returns_ring_contents() {
        let mem = memory();
        mem.write_i32s(RING, &[10, 20, 30, 40]).unwrap();
        mem.write_pod(
            INFO,
            &AuxInfoDsp {
                read_offset: 3,
                ..Default::default()
            },
        )
        .unwrap();

        let mut out = [0i32; 2];
        assert_eq!(read_aux_buffer(&mem, INFO, RING, 4, &mut out, 2, 0, 2), 2);
        assert_eq!(out, [40, 10]);
        assert_eq!(mem.read_pod::<AuxInfoDsp>(INFO).unwrap().read_offset, 1);
    }

    #[test]
    fn test_reset_clears_cursors() {
        let mem = memory();
        mem.write_pod(
            INFO,
            &AuxInfoDsp {
                read_offset: 1,
                write_offset: 2,
                total_sample_count: 3,
                ..Default::default()
            },
        )
        .unwrap();
        reset_aux_info(&mem, INFO);
        assert_eq!(mem.read_pod::<AuxInfoDsp>(INFO).unwrap(), AuxInfoDsp::default());
    }
}
