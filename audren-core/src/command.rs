//! Command list wire format
//!
//! A command list is what the host hands the ADSP each frame: a list header
//! followed by `command_count` variable-length records. All fields are
//! little-endian.
//!
//! ```text
//! CommandListHeader (20 bytes):
//!   0x00: command_count     u32
//!   0x04: sample_count      u32
//!   0x08: sample_rate       u32
//!   0x0C: mix_buffer_count  u32   buffers [0, mix_buffer_count) are mix busses
//!   0x10: buffer_count      u32
//!
//! CommandHeader (16 bytes), then the payload:
//!   0x00: magic       u32   0xCAFEBABE
//!   0x04: size        u32   header + payload
//!   0x08: enabled     u8
//!   0x09: command_id  u8
//!   0x0A: reserved    u16
//!   0x0C: node_id     i32
//! ```
//!
//! [`CommandReader`] validates magic and size before a payload is touched;
//! [`CommandListWriter`] builds lists for the ADSP and for tests.

use std::io::{self, Read, Write};

use bytemuck::{Pod, Zeroable};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::MAX_CHANNEL_COUNT;
use crate::error::WireError;

/// Every command record starts with this
pub const COMMAND_MAGIC: u32 = 0xCAFE_BABE;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CommandListHeader {
    pub command_count: u32,
    pub sample_count: u32,
    pub sample_rate: u32,
    pub mix_buffer_count: u32,
    pub buffer_count: u32,
}

impl CommandListHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CommandHeader {
    pub magic: u32,
    pub size: u32,
    pub enabled: u8,
    pub command_id: u8,
    pub reserved: u16,
    pub node_id: i32,
}

impl CommandHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    ClearMixBuffer = 0,
    Mix = 1,
    MixRamp = 2,
    Volume = 3,
    VolumeRamp = 4,
    BiquadFilter = 5,
    DepopForMixBuffers = 6,
    Copy = 7,
    Upload = 8,
    Aux = 9,
    Performance = 10,
    DeviceSink = 11,
}

impl TryFrom<u8> for CommandId {
    type Error = WireError;

    fn try_from(id: u8) -> Result<Self, WireError> {
        Ok(match id {
            0 => Self::ClearMixBuffer,
            1 => Self::Mix,
            2 => Self::MixRamp,
            3 => Self::Volume,
            4 => Self::VolumeRamp,
            5 => Self::BiquadFilter,
            6 => Self::DepopForMixBuffers,
            7 => Self::Copy,
            8 => Self::Upload,
            9 => Self::Aux,
            10 => Self::Performance,
            11 => Self::DeviceSink,
            _ => return Err(WireError::UnknownCommand(id)),
        })
    }
}

/// Which end of a frame a performance entry stamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PerformanceState {
    Start = 1,
    Stop = 2,
}

/// Guest ring addresses and cursor arguments of one aux channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuxCommand {
    pub input: u16,
    pub output: u16,
    pub effect_enabled: bool,
    pub send_info: u64,
    pub send_buffer: u64,
    pub return_info: u64,
    pub return_buffer: u64,
    pub count_max: u32,
    pub write_offset: u32,
    pub update_count: u32,
}

/// A decoded command payload
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ClearMixBuffer,
    Mix {
        input: u16,
        output: u16,
        volume: f32,
    },
    MixRamp {
        input: u16,
        output: u16,
        prev_volume: f32,
        volume: f32,
        previous_sample_address: u64,
    },
    Volume {
        input: u16,
        output: u16,
        volume: f32,
    },
    VolumeRamp {
        input: u16,
        output: u16,
        prev_volume: f32,
        volume: f32,
    },
    BiquadFilter {
        input: u16,
        output: u16,
        numerator: [i16; 3],
        denominator: [i16; 2],
        needs_init: bool,
        state_address: u64,
    },
    DepopForMixBuffers {
        input: u16,
        count: u16,
        decay: i32,
        depop_buffer_address: u64,
    },
    Copy {
        input: u16,
        output: u16,
    },
    /// Load host-rendered samples into a buffer
    Upload {
        output: u16,
        samples: Vec<i32>,
    },
    Aux(AuxCommand),
    Performance {
        state: PerformanceState,
        start_time_offset: u32,
        processed_time_offset: u32,
        entry_address: u64,
    },
    DeviceSink {
        input_count: u16,
        inputs: [u16; MAX_CHANNEL_COUNT],
    },
}

impl Command {
    pub fn id(&self) -> CommandId {
        match self {
            Self::ClearMixBuffer => CommandId::ClearMixBuffer,
            Self::Mix { .. } => CommandId::Mix,
            Self::MixRamp { .. } => CommandId::MixRamp,
            Self::Volume { .. } => CommandId::Volume,
            Self::VolumeRamp { .. } => CommandId::VolumeRamp,
            Self::BiquadFilter { .. } => CommandId::BiquadFilter,
            Self::DepopForMixBuffers { .. } => CommandId::DepopForMixBuffers,
            Self::Copy { .. } => CommandId::Copy,
            Self::Upload { .. } => CommandId::Upload,
            Self::Aux(_) => CommandId::Aux,
            Self::Performance { .. } => CommandId::Performance,
            Self::DeviceSink { .. } => CommandId::DeviceSink,
        }
    }

    /// Check buffer indices against the list's buffer count
    pub fn verify(&self, buffer_count: usize) -> bool {
        let ok = |index: u16| (index as usize) < buffer_count;
        match self {
            Self::ClearMixBuffer | Self::Performance { .. } => true,
            Self::Mix { input, output, .. }
            | Self::MixRamp { input, output, .. }
            | Self::Volume { input, output, .. }
            | Self::VolumeRamp { input, output, .. }
            | Self::BiquadFilter { input, output, .. }
            | Self::Copy { input, output }
            | Self::Aux(AuxCommand { input, output, .. }) => ok(*input) && ok(*output),
            Self::DepopForMixBuffers { input, count, .. } => {
                *input as usize + *count as usize <= buffer_count
            }
            Self::Upload { output, .. } => ok(*output),
            Self::DeviceSink {
                input_count,
                inputs,
            } => {
                let count = *input_count as usize;
                count <= MAX_CHANNEL_COUNT && inputs[..count].iter().all(|&i| ok(i))
            }
        }
    }

    /// Decode a payload for `id`
    pub fn decode(id: CommandId, payload: &[u8]) -> Result<Self, WireError> {
        let mut r = payload;
        Ok(match id {
            CommandId::ClearMixBuffer => Self::ClearMixBuffer,
            CommandId::Mix => Self::Mix {
                input: r.read_u16::<LittleEndian>()?,
                output: r.read_u16::<LittleEndian>()?,
                volume: r.read_f32::<LittleEndian>()?,
            },
            CommandId::MixRamp => Self::MixRamp {
                input: r.read_u16::<LittleEndian>()?,
                output: r.read_u16::<LittleEndian>()?,
                prev_volume: r.read_f32::<LittleEndian>()?,
                volume: r.read_f32::<LittleEndian>()?,
                previous_sample_address: r.read_u64::<LittleEndian>()?,
            },
            CommandId::Volume => Self::Volume {
                input: r.read_u16::<LittleEndian>()?,
                output: r.read_u16::<LittleEndian>()?,
                volume: r.read_f32::<LittleEndian>()?,
            },
            CommandId::VolumeRamp => Self::VolumeRamp {
                input: r.read_u16::<LittleEndian>()?,
                output: r.read_u16::<LittleEndian>()?,
                prev_volume: r.read_f32::<LittleEndian>()?,
                volume: r.read_f32::<LittleEndian>()?,
            },
            CommandId::BiquadFilter => {
                let input = r.read_u16::<LittleEndian>()?;
                let output = r.read_u16::<LittleEndian>()?;
                let mut numerator = [0i16; 3];
                r.read_i16_into::<LittleEndian>(&mut numerator)?;
                let mut denominator = [0i16; 2];
                r.read_i16_into::<LittleEndian>(&mut denominator)?;
                let needs_init = r.read_u8()? != 0;
                skip(&mut r, 3)?;
                Self::BiquadFilter {
                    input,
                    output,
                    numerator,
                    denominator,
                    needs_init,
                    state_address: r.read_u64::<LittleEndian>()?,
                }
            }
            CommandId::DepopForMixBuffers => Self::DepopForMixBuffers {
                input: r.read_u16::<LittleEndian>()?,
                count: r.read_u16::<LittleEndian>()?,
                decay: r.read_i32::<LittleEndian>()?,
                depop_buffer_address: r.read_u64::<LittleEndian>()?,
            },
            CommandId::Copy => Self::Copy {
                input: r.read_u16::<LittleEndian>()?,
                output: r.read_u16::<LittleEndian>()?,
            },
            CommandId::Upload => {
                let output = r.read_u16::<LittleEndian>()?;
                skip(&mut r, 2)?;
                let count = r.read_u32::<LittleEndian>()? as usize;
                if count > r.len() / 4 {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                }
                let mut samples = vec![0i32; count];
                r.read_i32_into::<LittleEndian>(&mut samples)?;
                Self::Upload { output, samples }
            }
            CommandId::Aux => {
                let input = r.read_u16::<LittleEndian>()?;
                let output = r.read_u16::<LittleEndian>()?;
                let effect_enabled = r.read_u8()? != 0;
                skip(&mut r, 3)?;
                Self::Aux(AuxCommand {
                    input,
                    output,
                    effect_enabled,
                    send_info: r.read_u64::<LittleEndian>()?,
                    send_buffer: r.read_u64::<LittleEndian>()?,
                    return_info: r.read_u64::<LittleEndian>()?,
                    return_buffer: r.read_u64::<LittleEndian>()?,
                    count_max: r.read_u32::<LittleEndian>()?,
                    write_offset: r.read_u32::<LittleEndian>()?,
                    update_count: r.read_u32::<LittleEndian>()?,
                })
            }
            CommandId::Performance => {
                let state = match r.read_u8()? {
                    1 => PerformanceState::Start,
                    2 => PerformanceState::Stop,
                    other => return Err(WireError::InvalidPerformanceState(other)),
                };
                skip(&mut r, 3)?;
                Self::Performance {
                    state,
                    start_time_offset: r.read_u32::<LittleEndian>()?,
                    processed_time_offset: r.read_u32::<LittleEndian>()?,
                    entry_address: r.read_u64::<LittleEndian>()?,
                }
            }
            CommandId::DeviceSink => {
                let input_count = r.read_u16::<LittleEndian>()?;
                let mut inputs = [0u16; MAX_CHANNEL_COUNT];
                r.read_u16_into::<LittleEndian>(&mut inputs)?;
                Self::DeviceSink {
                    input_count,
                    inputs,
                }
            }
        })
    }

    /// Append the payload to `w`
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Self::ClearMixBuffer => {}
            Self::Mix {
                input,
                output,
                volume,
            }
            | Self::Volume {
                input,
                output,
                volume,
            } => {
                w.write_u16::<LittleEndian>(*input)?;
                w.write_u16::<LittleEndian>(*output)?;
                w.write_f32::<LittleEndian>(*volume)?;
            }
            Self::MixRamp {
                input,
                output,
                prev_volume,
                volume,
                previous_sample_address,
            } => {
                w.write_u16::<LittleEndian>(*input)?;
                w.write_u16::<LittleEndian>(*output)?;
                w.write_f32::<LittleEndian>(*prev_volume)?;
                w.write_f32::<LittleEndian>(*volume)?;
                w.write_u64::<LittleEndian>(*previous_sample_address)?;
            }
            Self::VolumeRamp {
                input,
                output,
                prev_volume,
                volume,
            } => {
                w.write_u16::<LittleEndian>(*input)?;
                w.write_u16::<LittleEndian>(*output)?;
                w.write_f32::<LittleEndian>(*prev_volume)?;
                w.write_f32::<LittleEndian>(*volume)?;
            }
            Self::BiquadFilter {
                input,
                output,
                numerator,
                denominator,
                needs_init,
                state_address,
            } => {
                w.write_u16::<LittleEndian>(*input)?;
                w.write_u16::<LittleEndian>(*output)?;
                for &n in numerator {
                    w.write_i16::<LittleEndian>(n)?;
                }
                for &d in denominator {
                    w.write_i16::<LittleEndian>(d)?;
                }
                w.write_u8(*needs_init as u8)?;
                w.write_all(&[0; 3])?;
                w.write_u64::<LittleEndian>(*state_address)?;
            }
            Self::DepopForMixBuffers {
                input,
                count,
                decay,
                depop_buffer_address,
            } => {
                w.write_u16::<LittleEndian>(*input)?;
                w.write_u16::<LittleEndian>(*count)?;
                w.write_i32::<LittleEndian>(*decay)?;
                w.write_u64::<LittleEndian>(*depop_buffer_address)?;
            }
            Self::Copy { input, output } => {
                w.write_u16::<LittleEndian>(*input)?;
                w.write_u16::<LittleEndian>(*output)?;
            }
            Self::Upload { output, samples } => {
                w.write_u16::<LittleEndian>(*output)?;
                w.write_u16::<LittleEndian>(0)?;
                w.write_u32::<LittleEndian>(samples.len() as u32)?;
                for &s in samples {
                    w.write_i32::<LittleEndian>(s)?;
                }
            }
            Self::Aux(aux) => {
                w.write_u16::<LittleEndian>(aux.input)?;
                w.write_u16::<LittleEndian>(aux.output)?;
                w.write_u8(aux.effect_enabled as u8)?;
                w.write_all(&[0; 3])?;
                w.write_u64::<LittleEndian>(aux.send_info)?;
                w.write_u64::<LittleEndian>(aux.send_buffer)?;
                w.write_u64::<LittleEndian>(aux.return_info)?;
                w.write_u64::<LittleEndian>(aux.return_buffer)?;
                w.write_u32::<LittleEndian>(aux.count_max)?;
                w.write_u32::<LittleEndian>(aux.write_offset)?;
                w.write_u32::<LittleEndian>(aux.update_count)?;
            }
            Self::Performance {
                state,
                start_time_offset,
                processed_time_offset,
                entry_address,
            } => {
                w.write_u8(*state as u8)?;
                w.write_all(&[0; 3])?;
                w.write_u32::<LittleEndian>(*start_time_offset)?;
                w.write_u32::<LittleEndian>(*processed_time_offset)?;
                w.write_u64::<LittleEndian>(*entry_address)?;
            }
            Self::DeviceSink {
                input_count,
                inputs,
            } => {
                w.write_u16::<LittleEndian>(*input_count)?;
                for &i in inputs {
                    w.write_u16::<LittleEndian>(i)?;
                }
            }
        }
        Ok(())
    }
}

fn skip(r: &mut &[u8], count: usize) -> io::Result<()> {
    let mut pad = [0u8; 8];
    r.read_exact(&mut pad[..count])
}

/// One record of a command list, header validated
#[derive(Debug, Clone, Copy)]
pub struct CommandRecord<'a> {
    pub offset: usize,
    pub header: CommandHeader,
    pub payload: &'a [u8],
}

impl CommandRecord<'_> {
    pub fn enabled(&self) -> bool {
        self.header.enabled != 0
    }

    pub fn node_id(&self) -> i32 {
        self.header.node_id
    }

    pub fn command(&self) -> Result<Command, WireError> {
        let id = CommandId::try_from(self.header.command_id)?;
        Command::decode(id, self.payload)
    }
}

/// Bounds-checked cursor over a command list
#[derive(Debug, Clone)]
pub struct CommandReader<'a> {
    data: &'a [u8],
    header: CommandListHeader,
    offset: usize,
}

impl<'a> CommandReader<'a> {
    /// Parse the list header and position at the first record
    pub fn new(data: &'a [u8]) -> Result<Self, WireError> {
        let bytes = data
            .get(..CommandListHeader::SIZE)
            .ok_or(WireError::TruncatedList(data.len()))?;
        Ok(Self {
            data,
            header: bytemuck::pod_read_unaligned(bytes),
            offset: CommandListHeader::SIZE,
        })
    }

    pub fn header(&self) -> &CommandListHeader {
        &self.header
    }

    /// Byte offset of the next record
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Continue from a byte offset returned by [`Self::offset`]
    pub fn seek(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// Validate and step over the next record
    pub fn next_record(&mut self) -> Result<CommandRecord<'a>, WireError> {
        let offset = self.offset;
        let len = self.data.len();
        let bytes = self
            .data
            .get(offset..offset + CommandHeader::SIZE)
            .ok_or(WireError::OutOfBounds {
                offset,
                size: CommandHeader::SIZE,
                len,
            })?;
        let header: CommandHeader = bytemuck::pod_read_unaligned(bytes);
        if header.magic != COMMAND_MAGIC {
            return Err(WireError::BadMagic {
                offset,
                magic: header.magic,
            });
        }

        let size = header.size as usize;
        let end = offset.checked_add(size).filter(|&end| end <= len);
        let Some(end) = end.filter(|_| size >= CommandHeader::SIZE) else {
            return Err(WireError::OutOfBounds { offset, size, len });
        };

        self.offset = end;
        Ok(CommandRecord {
            offset,
            header,
            payload: &self.data[offset + CommandHeader::SIZE..end],
        })
    }
}

/// Builds a command list
#[derive(Debug)]
pub struct CommandListWriter {
    header: CommandListHeader,
    data: Vec<u8>,
}

impl CommandListWriter {
    pub fn new(sample_count: u32, sample_rate: u32, mix_buffer_count: u32, buffer_count: u32) -> Self {
        Self {
            header: CommandListHeader {
                command_count: 0,
                sample_count,
                sample_rate,
                mix_buffer_count,
                buffer_count,
            },
            data: vec![0; CommandListHeader::SIZE],
        }
    }

    pub fn command_count(&self) -> u32 {
        self.header.command_count
    }

    /// Append one record
    pub fn push(&mut self, enabled: bool, node_id: i32, command: &Command) -> Result<(), WireError> {
        let mut payload = Vec::new();
        command.encode(&mut payload)?;
        let header = CommandHeader {
            magic: COMMAND_MAGIC,
            size: (CommandHeader::SIZE + payload.len()) as u32,
            enabled: enabled as u8,
            command_id: command.id() as u8,
            reserved: 0,
            node_id,
        };
        self.data.extend_from_slice(bytemuck::bytes_of(&header));
        self.data.extend_from_slice(&payload);
        self.header.command_count += 1;
        Ok(())
    }

    /// Finished list bytes
    pub fn finish(mut self) -> Vec<u8> {
        self.data[..CommandListHeader::SIZE].copy_from_slice(bytemuck::bytes_of(&self.header));
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(commands: &[Command]) -> Vec<u8> {
        let mut writer = CommandListWriter::new(4, 48_000, 2, 8);
        for (node, command) in commands.iter().enumerate() {
            writer.push(true, node as i32, command).unwrap();
        }
        writer.finish()
    }

    #[test]
    fn test_header_sizes() {
        assert_eq!(CommandListHeader::SIZE, 20);
        assert_eq!(CommandHeader::SIZE, 16);
    }

    #[test]
    fn test_reader_walks_records() {
        let data = list(&[
            Command::ClearMixBuffer,
            Command::Mix {
                input: 0,
                output: 1,
                volume: 1.0,
            },
        ]);
        let mut reader = CommandReader::new(&data).unwrap();
        assert_eq!(reader.header().command_count, 2);
        assert_eq!(reader.header().buffer_count, 8);

        let first = reader.next_record().unwrap();
        assert_eq!(first.header.size, 16);
        assert_eq!(first.command().unwrap(), Command::ClearMixBuffer);

        let second = reader.next_record().unwrap();
        assert_eq!(second.node_id(), 1);
        assert!(second.enabled());
        assert_eq!(second.header.size, 24);
        assert!(matches!(
            second.command().unwrap(),
            Command::Mix { output: 1, .. }
        ));
        assert_eq!(reader.offset(), data.len());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut data = list(&[Command::ClearMixBuffer]);
        data[CommandListHeader::SIZE] ^= 0xFF;
        let mut reader = CommandReader::new(&data).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(WireError::BadMagic { offset: 20, .. })
        ));
    }

    #[test]
    fn test_oversized_record_rejected() {
        let mut data = list(&[Command::ClearMixBuffer]);
        data[CommandListHeader::SIZE + 4] = 0x40;
        let mut reader = CommandReader::new(&data).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(WireError::OutOfBounds { size: 0x40, .. })
        ));

        // A size smaller than the header would never advance
        data[CommandListHeader::SIZE + 4] = 4;
        let mut reader = CommandReader::new(&data).unwrap();
        assert!(reader.next_record().is_err());
    }

    #[test]
    fn test_truncated_list() {
        assert!(matches!(
            CommandReader::new(&[0; 8]),
            Err(WireError::TruncatedList(8))
        ));
    }

    #[test]
    fn test_unknown_id_and_short_payload() {
        let mut data = list(&[Command::Copy {
            input: 0,
            output: 1,
        }]);
        data[CommandListHeader::SIZE + 9] = 42;
        let mut reader = CommandReader::new(&data).unwrap();
        let record = reader.next_record().unwrap();
        assert!(matches!(record.command(), Err(WireError::UnknownCommand(42))));

        assert!(Command::decode(CommandId::MixRamp, &[0; 6]).is_err());
    }

    #[test]
    fn test_upload_and_aux_payloads() {
        let aux = AuxCommand {
            input: 1,
            output: 2,
            effect_enabled: true,
            send_info: 0x1000,
            send_buffer: 0x1040,
            return_info: 0x2000,
            return_buffer: 0x2040,
            count_max: 960,
            write_offset: 240,
            update_count: 480,
        };
        let data = list(&[
            Command::Upload {
                output: 3,
                samples: vec![1, -2, 3],
            },
            Command::Aux(aux),
        ]);
        let mut reader = CommandReader::new(&data).unwrap();
        assert_eq!(
            reader.next_record().unwrap().command().unwrap(),
            Command::Upload {
                output: 3,
                samples: vec![1, -2, 3],
            }
        );
        assert_eq!(
            reader.next_record().unwrap().command().unwrap(),
            Command::Aux(aux)
        );
    }

    #[test]
    fn test_upload_count_bounded_by_payload() {
        let mut payload = vec![0u8; 8];
        payload[4..8].copy_from_slice(&1000u32.to_le_bytes());
        assert!(Command::decode(CommandId::Upload, &payload).is_err());
    }

    #[test]
    fn test_verify_buffer_indices() {
        let mix = |output| Command::Mix {
            input: 0,
            output,
            volume: 1.0,
        };
        assert!(mix(7).verify(8));
        assert!(!mix(8).verify(8));

        let depop = |input, count| Command::DepopForMixBuffers {
            input,
            count,
            decay: 0x7B29,
            depop_buffer_address: 0,
        };
        assert!(depop(4, 4).verify(8));
        assert!(!depop(5, 4).verify(8));

        let sink = Command::DeviceSink {
            input_count: 7,
            inputs: [0; MAX_CHANNEL_COUNT],
        };
        assert!(!sink.verify(8));
    }

    #[test]
    fn test_performance_state_decoded() {
        let mut payload = Vec::new();
        Command::Performance {
            state: PerformanceState::Stop,
            start_time_offset: 0,
            processed_time_offset: 4,
            entry_address: 0x3000,
        }
        .encode(&mut payload)
        .unwrap();
        assert!(matches!(
            Command::decode(CommandId::Performance, &payload).unwrap(),
            Command::Performance {
                state: PerformanceState::Stop,
                processed_time_offset: 4,
                ..
            }
        ));
        payload[0] = 9;
        assert!(matches!(
            Command::decode(CommandId::Performance, &payload),
            Err(WireError::InvalidPerformanceState(9))
        ));
    }
}
