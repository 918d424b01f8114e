//! Output stream between the ADSP and the audio backend
//!
//! The ADSP's device sink command appends interleaved PCM16 to a
//! [`SinkStream`]; the backend drains it through a [`SinkReader`]. Between
//! them sits a fixed-size ring buffer, so a slow backend drops the newest
//! audio instead of stalling the render thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, trace};

use crate::common::{Channel, MAX_CHANNEL_COUNT};
use crate::config::SinkConfig;

/// Samples per channel in one sink frame
pub const SINK_FRAME_SAMPLES: usize = 240;

/// 5.1 to stereo weights for front, center, LFE and back
const DOWNMIX_COEFFICIENTS: [f32; 4] = [1.0, 0.707, 0.251, 0.707];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    Started,
    #[default]
    Stopped,
    Paused,
}

struct SinkShared {
    producer: Mutex<HeapProd<i16>>,
    consumer: Mutex<HeapCons<i16>>,
    volume: Mutex<f32>,
    state: Mutex<StreamState>,
    device_channels: usize,
    dropped_samples: AtomicU64,
}

/// Producer side of a session's output stream.
///
/// Cloning shares the same ring.
#[derive(Clone)]
pub struct SinkStream {
    shared: Arc<SinkShared>,
    /// Reused for channel conversion
    scratch: Vec<i16>,
}

impl SinkStream {
    pub fn new(config: &SinkConfig) -> Self {
        let device_channels = (config.device_channels as usize).clamp(1, MAX_CHANNEL_COUNT);
        if device_channels != config.device_channels as usize {
            debug!(
                "Sink device channels {} clamped to {}",
                config.device_channels, device_channels
            );
        }
        let ring_buffers = config.ring_buffers.max(1);
        if ring_buffers != config.ring_buffers {
            debug!("Sink ring buffers {} raised to {}", config.ring_buffers, ring_buffers);
        }
        let capacity = ring_buffers * SINK_FRAME_SAMPLES * device_channels;
        let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
        Self {
            shared: Arc::new(SinkShared {
                producer: Mutex::new(producer),
                consumer: Mutex::new(consumer),
                volume: Mutex::new(config.volume),
                state: Mutex::new(StreamState::Stopped),
                device_channels,
                dropped_samples: AtomicU64::new(0),
            }),
            scratch: Vec::new(),
        }
    }

    pub fn device_channels(&self) -> usize {
        self.shared.device_channels
    }

    pub fn volume(&self) -> f32 {
        *self.shared.volume.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_volume(&self, volume: f32) {
        *self.shared.volume.lock().unwrap_or_else(|e| e.into_inner()) = volume;
    }

    pub fn state(&self) -> StreamState {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start(&self) {
        self.set_state(StreamState::Started);
    }

    pub fn stop(&self) {
        self.set_state(StreamState::Stopped);
    }

    pub fn pause(&self) {
        self.set_state(StreamState::Paused);
    }

    fn set_state(&self, state: StreamState) {
        let mut current = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if *current != state {
            debug!("Sink stream {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Samples waiting for the backend
    pub fn queued_samples(&self) -> usize {
        self.shared
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .occupied_len()
    }

    /// Samples discarded because the ring was full
    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped_samples.load(Ordering::Relaxed)
    }

    /// Drop everything queued
    pub fn clear_queue(&self) {
        let cleared = self
            .shared
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        trace!("Sink cleared {} samples", cleared);
    }

    /// Queue interleaved samples with `system_channels` channels.
    ///
    /// Samples are converted to the device layout and scaled by the stream
    /// volume on the way in.
    pub fn append(&mut self, samples: &[i16], system_channels: usize) {
        if system_channels == 0 {
            return;
        }
        let device_channels = self.shared.device_channels;
        let volume = self.volume();
        let frames = samples.len() / system_channels;
        let scale = |sample: f32| (sample * volume).clamp(i16::MIN as f32, i16::MAX as f32) as i16;

        self.scratch.clear();
        self.scratch.reserve(frames * device_channels);
        for frame in samples.chunks_exact(system_channels) {
            if system_channels == 6 && device_channels == 2 {
                let s = |c: Channel| frame[c as usize] as f32;
                let [front, center, lfe, back] = DOWNMIX_COEFFICIENTS;
                let common = s(Channel::Center) * center + s(Channel::Lfe) * lfe;
                let left = s(Channel::FrontLeft) * front + common + s(Channel::BackLeft) * back;
                let right = s(Channel::FrontRight) * front + common + s(Channel::BackRight) * back;
                self.scratch.push(scale(left));
                self.scratch.push(scale(right));
            } else {
                for channel in 0..device_channels {
                    let sample = frame.get(channel).copied().unwrap_or(0);
                    self.scratch.push(scale(sample as f32));
                }
            }
        }

        let pushed = self
            .shared
            .producer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_slice(&self.scratch);
        let dropped = self.scratch.len() - pushed;
        if dropped > 0 {
            self.shared
                .dropped_samples
                .fetch_add(dropped as u64, Ordering::Relaxed);
            trace!("Sink full, dropped {} samples", dropped);
        }
    }

    /// Backend-side handle
    pub fn reader(&self) -> SinkReader {
        SinkReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Consumer side of a [`SinkStream`]
#[derive(Clone)]
pub struct SinkReader {
    shared: Arc<SinkShared>,
}

impl SinkReader {
    pub fn device_channels(&self) -> usize {
        self.shared.device_channels
    }

    /// Fill `out` with queued samples, padding with silence.
    ///
    /// Nothing is consumed unless the stream is started. Returns the
    /// number of real samples written.
    pub fn read(&self, out: &mut [i16]) -> usize {
        let state = *self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        let popped = if state == StreamState::Started {
            self.shared
                .consumer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_slice(out)
        } else {
            0
        };
        out[popped..].fill(0);
        popped
    }
}
