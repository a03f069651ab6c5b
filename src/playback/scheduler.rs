//! Gapless sequential playback of independently arriving buffers.
//!
//! Buffers are placed back-to-back on the output clock: each one starts at
//! the later of "now" and the end of the previous one. Network jitter then
//! only delays playback; it never reorders or overlaps it.

use crate::audio::platform::{OutputContext, PlaybackHandle};
use crate::codec::AudioBuffer;
use crate::error::{LivevoxError, Result};
use crate::playback::clock::Clock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Identifies one scheduled buffer within a scheduler.
pub type PlaybackId = u64;

/// Called (from any thread) when a unit finishes playing on its own.
pub type EndedNotifier = Arc<dyn Fn(PlaybackId) + Send + Sync>;

/// Where and for how long a buffer was scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackUnit {
    pub id: PlaybackId,
    pub start_time: f64,
    pub duration: f64,
}

impl PlaybackUnit {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn OutputContext>,
    clock: Arc<dyn Clock>,
    next_start_time: f64,
    scheduled: BTreeMap<PlaybackId, Box<dyn PlaybackHandle>>,
    next_id: PlaybackId,
    notifier: EndedNotifier,
}

impl PlaybackScheduler {
    /// Arms a scheduler on `output`, with the cursor at the output clock's
    /// current time.
    ///
    /// `notifier` is how natural end-of-playback reaches the owner, who then
    /// calls [`Self::on_ended`] on its own task.
    pub fn new(output: Box<dyn OutputContext>, notifier: EndedNotifier) -> Self {
        let clock = output.clock();
        let next_start_time = clock.now();
        Self {
            output,
            clock,
            next_start_time,
            scheduled: BTreeMap::new(),
            next_id: 0,
            notifier,
        }
    }

    /// Schedule `buffer` right after everything already queued.
    ///
    /// # Errors
    /// Returns `LivevoxError::AudioPlayback` if the output context is closed
    /// or rejects the buffer.
    pub fn enqueue(&mut self, buffer: AudioBuffer) -> Result<PlaybackUnit> {
        if self.output.is_closed() {
            return Err(LivevoxError::AudioPlayback {
                message: "output context is closed".to_string(),
            });
        }

        let start_time = self.clock.now().max(self.next_start_time);
        let duration = buffer.duration();
        let id = self.next_id;
        self.next_id += 1;

        let notifier = Arc::clone(&self.notifier);
        let handle = self
            .output
            .schedule(buffer, start_time, Box::new(move || notifier(id)))?;

        self.next_start_time = start_time + duration;
        self.scheduled.insert(id, handle);

        Ok(PlaybackUnit {
            id,
            start_time,
            duration,
        })
    }

    /// Forget a unit that finished playing. Returns false for unknown ids
    /// (already interrupted, or a stale notification).
    pub fn on_ended(&mut self, id: PlaybackId) -> bool {
        self.scheduled.remove(&id).is_some()
    }

    /// Stop everything immediately and reset the cursor to now.
    ///
    /// Returns how many units were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.scheduled.len();
        for (_, mut handle) in std::mem::take(&mut self.scheduled) {
            handle.stop();
        }
        self.next_start_time = self.clock.now();
        if stopped > 0 {
            debug!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Interrupt and close the output context. Idempotent.
    pub fn close(&mut self) {
        self.interrupt();
        if !self.output.is_closed() {
            self.output.close();
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Number of units currently scheduled or playing.
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_idle(&self) -> bool {
        self.scheduled.is_empty()
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_closed()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
