//! Host/ADSP mailbox
//!
//! Two one-way message queues plus the per-session command buffer slots the
//! host fills before each render signal. Each queue carries a counting
//! event, so a message sent before the receiver starts waiting is never
//! missed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{error, trace};

use super::{CommandBuffer, RenderMessage};
use crate::common::MAX_RENDERER_SESSIONS;

/// One direction of the mailbox
#[derive(Default)]
struct MessageQueue {
    messages: Mutex<VecDeque<RenderMessage>>,
    /// Messages sent and not yet received
    pending: Mutex<u32>,
    signal: Condvar,
    sent: AtomicU64,
}

impl MessageQueue {
    fn send(&self, message: RenderMessage) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
        self.sent.fetch_add(1, Ordering::SeqCst);

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending += 1;
        self.signal.notify_one();
    }

    /// Block until the event is set, or until `timeout` passes
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match timeout {
            None => {
                while *pending == 0 {
                    pending = self
                        .signal
                        .wait(pending)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
            Some(timeout) => {
                let (guard, _) = self
                    .signal
                    .wait_timeout_while(pending, timeout, |pending| *pending == 0)
                    .unwrap_or_else(|e| e.into_inner());
                pending = guard;
                if *pending == 0 {
                    return false;
                }
            }
        }
        *pending -= 1;
        true
    }

    fn receive(&self, timeout: Option<Duration>, who: &str) -> RenderMessage {
        if !self.wait(timeout) {
            trace!("{} wait timed out", who);
            return RenderMessage::Invalid;
        }
        match self
            .messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            Some(message) => message,
            None => {
                error!("{} woke with an empty message queue", who);
                RenderMessage::Invalid
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

#[derive(Default)]
pub struct Mailbox {
    /// ADSP to host
    host_inbox: MessageQueue,
    /// Host to ADSP
    adsp_inbox: MessageQueue,
    command_buffers: Mutex<[CommandBuffer; MAX_RENDERER_SESSIONS]>,
    signalled_tick: AtomicU64,
    /// Held by the host for the length of one render request or shutdown
    pub(super) host_lock: Mutex<()>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host_send(&self, message: RenderMessage) {
        trace!("host -> adsp {:?}", message);
        self.adsp_inbox.send(message);
    }

    pub fn host_wait(&self) -> RenderMessage {
        self.host_inbox.receive(None, "Host")
    }

    /// Returns `Invalid` if nothing arrives within `timeout`
    pub fn host_wait_timeout(&self, timeout: Duration) -> RenderMessage {
        self.host_inbox.receive(Some(timeout), "Host")
    }

    pub fn adsp_send(&self, message: RenderMessage) {
        trace!("adsp -> host {:?}", message);
        self.host_inbox.send(message);
    }

    pub fn adsp_wait(&self) -> RenderMessage {
        self.adsp_inbox.receive(None, "ADSP")
    }

    pub fn adsp_wait_timeout(&self, timeout: Duration) -> RenderMessage {
        self.adsp_inbox.receive(Some(timeout), "ADSP")
    }

    /// Messages the host has sent
    pub fn host_sent_count(&self) -> u64 {
        self.adsp_inbox.sent.load(Ordering::SeqCst)
    }

    /// Messages the ADSP has sent
    pub fn adsp_sent_count(&self) -> u64 {
        self.host_inbox.sent.load(Ordering::SeqCst)
    }

    /// True when neither side has an unreceived message
    pub fn is_idle(&self) -> bool {
        self.host_inbox.is_empty() && self.adsp_inbox.is_empty()
    }

    fn slots(&self) -> MutexGuard<'_, [CommandBuffer; MAX_RENDERER_SESSIONS]> {
        self.command_buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn command_buffer(&self, session: usize) -> CommandBuffer {
        self.slots().get(session).cloned().unwrap_or_default()
    }

    /// Hand a session's list over. The counters the ADSP writes back are kept.
    pub fn set_command_buffer(&self, session: usize, buffer: CommandBuffer) {
        if let Some(slot) = self.slots().get_mut(session) {
            *slot = CommandBuffer {
                remaining_command_count: slot.remaining_command_count,
                render_time_taken: slot.render_time_taken,
                ..buffer
            };
        }
    }

    /// Modify a slot in place
    pub fn update_command_buffer(&self, session: usize, f: impl FnOnce(&mut CommandBuffer)) {
        if let Some(slot) = self.slots().get_mut(session) {
            f(slot);
        }
    }

    pub fn clear_remain_count(&self, session: usize) {
        self.update_command_buffer(session, |slot| slot.remaining_command_count = 0);
    }

    /// Drop the lists handed over for the last render. Counters survive.
    pub fn clear_command_buffers(&self) {
        for slot in self.slots().iter_mut() {
            slot.buffer = None;
            slot.reset_buffers = false;
        }
    }

    pub fn signalled_tick(&self) -> u64 {
        self.signalled_tick.load(Ordering::SeqCst)
    }

    pub fn set_signalled_tick(&self, tick: u64) {
        self.signalled_tick.store(tick, Ordering::SeqCst);
    }
}
