//! Audren Core - High-level emulation of the console audio renderer
//!
//! The guest describes voices, effects, mixes and splitters. This crate
//! turns each frame of that description into a command list, runs the
//! list on an emulated audio DSP thread, and queues the result on an
//! output stream the host audio backend drains.
//!
//! # Architecture
//!
//! - [`AudioRenderer`] - One guest renderer session: applies updates and renders frames
//! - [`CommandGenerator`] - Walks the render graph and emits DSP commands
//! - [`Adsp`] - Render thread, mailbox handshake and command list processing
//! - [`SinkStream`] - Bounded PCM16 queue between the DSP and the host device
//!
//! Guest memory is reached only through the [`GuestMemory`] trait, and time
//! only through [`Clock`], so tests can drive both deterministically.

pub mod adsp;
pub mod behavior;
pub mod command;
pub mod common;
pub mod config;
pub mod dsp;
pub mod effect;
pub mod error;
pub mod generator;
pub mod memory;
pub mod mix;
pub mod renderer;
pub mod resample;
pub mod sink;
pub mod splitter;
#[cfg(test)]
pub mod test_utils;
pub mod timing;
pub mod voice;

pub use adsp::{Adsp, CommandBuffer, CommandListProcessor, Mailbox, RenderMessage};
pub use behavior::BehaviorInfo;
pub use command::{Command, CommandListHeader, CommandListWriter, CommandReader};
pub use config::{AudioConfig, RendererConfig, SinkConfig};
pub use error::{ConfigError, MemoryError, RendererError, Result, WireError};
pub use generator::{CommandGenerator, RenderGraph};
pub use memory::{GuestMemory, GuestMemoryExt, SharedMemory};
pub use renderer::{
    AudioRenderer, AudioRendererParameter, MemoryPoolInfo, MemoryPoolState, UpdateOutput,
    UpdateParameters,
};
pub use sink::{SinkReader, SinkStream, StreamState};
pub use timing::{Clock, HostClock, ManualClock};
