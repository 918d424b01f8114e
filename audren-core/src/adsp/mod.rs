//! Audio DSP emulation
//!
//! A dedicated thread stands in for the ADSP coprocessor. The host hands
//! it one command list per renderer session through the [`Mailbox`], sends
//! `Render`, and blocks until the thread answers `RenderResponse`.
//!
//! Protocol:
//! - start: ADSP sends `InitializeOK`, host waits for it and replies
//!   `InitializeOK`
//! - frame: host fills the session slots and sends `Render`; the ADSP
//!   processes session 0 then session 1 and sends `RenderResponse`
//! - stop: host sends `Shutdown`, the ADSP echoes it and exits
//!
//! Unexpected messages are logged and otherwise ignored on both sides.

mod mailbox;
mod processor;

#[cfg(test)]
mod tests;

pub use mailbox::Mailbox;
pub use processor::CommandListProcessor;

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::common::MAX_RENDERER_SESSIONS;
use crate::config::AudioConfig;
use crate::error::{RendererError, Result};
use crate::memory::GuestMemory;
use crate::sink::SinkStream;
use crate::timing::Clock;

/// Mailbox message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMessage {
    #[default]
    Invalid,
    InitializeOK,
    Render,
    RenderResponse,
    Shutdown,
}

/// One session's mailbox slot
#[derive(Debug, Clone, Default)]
pub struct CommandBuffer {
    /// Encoded command list, `None` when the session has nothing this frame
    pub buffer: Option<Arc<[u8]>>,
    /// Drop queued sink audio before processing
    pub reset_buffers: bool,
    /// Processing budget in nanoseconds
    pub time_limit: u64,
    /// Written back by the ADSP
    pub remaining_command_count: u32,
    /// Written back by the ADSP, in nanoseconds
    pub render_time_taken: u64,
    pub applet_resource_user_id: u64,
}

/// The render thread's state
struct AdspRenderer {
    mailbox: Arc<Mailbox>,
    processors: Vec<CommandListProcessor>,
    enforce_time_budget: bool,
}

impl AdspRenderer {
    fn run(mut self) {
        debug!("ADSP render thread started");
        self.mailbox.adsp_send(RenderMessage::InitializeOK);
        match self.mailbox.adsp_wait() {
            RenderMessage::InitializeOK => {}
            other => error!("ADSP expected InitializeOK, got {:?}", other),
        }

        loop {
            match self.mailbox.adsp_wait() {
                RenderMessage::Render => {
                    self.render_cycle();
                    self.mailbox.adsp_send(RenderMessage::RenderResponse);
                }
                RenderMessage::Shutdown => {
                    self.mailbox.adsp_send(RenderMessage::Shutdown);
                    break;
                }
                other => warn!("ADSP ignoring unexpected {:?}", other),
            }
        }
        debug!("ADSP render thread finished");
    }

    /// Process every session with a list, session 0 first
    fn render_cycle(&mut self) {
        // (applet id, render time) of session 0 this cycle
        let mut first: Option<(u64, u64)> = None;

        for (session, processor) in self.processors.iter_mut().enumerate() {
            let slot = self.mailbox.command_buffer(session);
            let Some(list) = slot.buffer.clone() else {
                continue;
            };

            // A cleared remain count drops whatever was left of the previous list
            if slot.remaining_command_count == 0 || processor.remaining_command_count() == 0 {
                if let Err(e) = processor.initialize(list) {
                    error!("Session {} command list rejected: {}", session, e);
                    self.mailbox.update_command_buffer(session, |slot| {
                        slot.remaining_command_count = 0;
                        slot.render_time_taken = 0;
                    });
                    continue;
                }
            }

            if slot.reset_buffers {
                if let Some(stream) = processor.stream() {
                    stream.clear_queue();
                }
            }

            let mut time_limit = slot.time_limit;
            if let Some((applet, taken)) = first {
                if applet == slot.applet_resource_user_id {
                    time_limit = time_limit.saturating_sub(taken);
                }
            }

            let taken = processor.process(self.enforce_time_budget.then_some(time_limit));
            let remaining = processor.remaining_command_count();
            self.mailbox.update_command_buffer(session, |slot| {
                slot.reset_buffers = false;
                slot.remaining_command_count = remaining;
                slot.render_time_taken = taken;
            });

            if session == 0 {
                first = Some((slot.applet_resource_user_id, taken));
            }
        }
    }
}

/// Host-side handle to the ADSP.
///
/// Dropping it shuts the render thread down.
pub struct Adsp {
    mailbox: Arc<Mailbox>,
    memory: Arc<dyn GuestMemory>,
    clock: Arc<dyn Clock>,
    streams: Vec<SinkStream>,
    enforce_time_budget: bool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Adsp {
    pub fn new(memory: Arc<dyn GuestMemory>, clock: Arc<dyn Clock>, config: &AudioConfig) -> Self {
        Self {
            mailbox: Arc::new(Mailbox::new()),
            memory,
            clock,
            streams: (0..MAX_RENDERER_SESSIONS)
                .map(|_| SinkStream::new(&config.sink))
                .collect(),
            enforce_time_budget: config.renderer.enforce_time_budget,
            thread: Mutex::new(None),
        }
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Spawn the render thread and complete the handshake.
    ///
    /// Does nothing if already running.
    pub fn start(&self) -> Result<()> {
        let mut thread = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        if thread.is_some() {
            return Ok(());
        }

        let renderer = AdspRenderer {
            mailbox: Arc::clone(&self.mailbox),
            processors: self
                .streams
                .iter()
                .map(|stream| {
                    CommandListProcessor::new(
                        Arc::clone(&self.memory),
                        Arc::clone(&self.clock),
                        Some(stream.clone()),
                    )
                })
                .collect(),
            enforce_time_budget: self.enforce_time_budget,
        };
        let handle = thread::Builder::new()
            .name("adsp-render".into())
            .spawn(move || renderer.run())
            .map_err(RendererError::ThreadSpawn)?;

        match self.mailbox.host_wait() {
            RenderMessage::InitializeOK => {}
            other => error!("Host expected InitializeOK, got {:?}", other),
        }
        self.mailbox.host_send(RenderMessage::InitializeOK);

        *thread = Some(handle);
        info!("ADSP started");
        Ok(())
    }

    /// Shut the render thread down and join it
    pub fn stop(&self) {
        let Some(handle) = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            return;
        };

        {
            let _guard = self
                .mailbox
                .host_lock
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            self.mailbox.host_send(RenderMessage::Shutdown);
            match self.mailbox.host_wait() {
                RenderMessage::Shutdown => {}
                other => error!("Host expected Shutdown, got {:?}", other),
            }
        }

        if handle.join().is_err() {
            error!("ADSP render thread panicked");
        }
        info!("ADSP stopped");
    }

    /// Place a session's list for the next render
    pub fn send_command_buffer(&self, session: usize, buffer: CommandBuffer) -> Result<()> {
        if session >= MAX_RENDERER_SESSIONS {
            return Err(RendererError::OutOfRange {
                what: "session",
                index: session,
                max: MAX_RENDERER_SESSIONS,
            });
        }
        self.mailbox.set_command_buffer(session, buffer);
        Ok(())
    }

    /// Run one render cycle on the ADSP and wait for it to finish
    pub fn render(&self) {
        if !self.is_running() {
            warn!("ADSP render requested while stopped");
            return;
        }
        let _guard = self
            .mailbox
            .host_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        self.mailbox.set_signalled_tick(self.clock.clock_ticks());
        self.mailbox.host_send(RenderMessage::Render);
        match self.mailbox.host_wait() {
            RenderMessage::RenderResponse => {}
            other => error!("Host expected RenderResponse, got {:?}", other),
        }
        self.mailbox.clear_command_buffers();
    }

    pub fn remaining_command_count(&self, session: usize) -> u32 {
        self.mailbox.command_buffer(session).remaining_command_count
    }

    pub fn clear_remain_count(&self, session: usize) {
        self.mailbox.clear_remain_count(session);
    }

    /// Nanoseconds the last render spent on `session`
    pub fn render_time_taken(&self, session: usize) -> u64 {
        self.mailbox.command_buffer(session).render_time_taken
    }

    /// Tick at which the last render was signalled
    pub fn signalled_tick(&self) -> u64 {
        self.mailbox.signalled_tick()
    }

    /// The output stream fed by `session`'s device sink commands
    pub fn sink_stream(&self, session: usize) -> Option<&SinkStream> {
        self.streams.get(session)
    }
}

impl Drop for Adsp {
    fn drop(&mut self) {
        self.stop();
    }
}
