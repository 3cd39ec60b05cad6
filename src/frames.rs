//! Tracking of frames handed to the radio.
//!
//! Every frame popped from the output stack gets a [`FrameCookie`] and a
//! [`FrameQueueEntry`] until the radio reports it radiated or failed, or until
//! it times out.

use crate::ids::{ChannelId, FrameCookie};
use crate::protocol::RadioUplinkState;
use crate::stack::{FrameParams, PartCookies};
use heapless::Vec as BoundedVec;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub const MAX_TRACKED_FRAMES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameState {
    SentToRadio,
    InWait,
    InProgress,
    Radiated,
    Failed,
}

impl FrameState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FrameState::Radiated | FrameState::Failed)
    }

    /// Frame sits in, or is on its way to, the radio's single input slot.
    pub fn occupies_radio_slot(self) -> bool {
        matches!(self, FrameState::SentToRadio | FrameState::InWait)
    }
}

#[derive(Debug, Clone)]
pub struct FrameQueueEntry {
    pub frame_cookie: FrameCookie,
    pub channel_id: ChannelId,
    pub sdu_part_cookies: PartCookies,
    pub send_time: Instant,
    pub state: FrameState,
}

impl FrameQueueEntry {
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.send_time) >= timeout
    }
}

/// A tracked frame that reached a terminal state.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub entry: FrameQueueEntry,
    pub timed_out: bool,
}

#[derive(Debug)]
pub struct FrameTracker {
    entries: BoundedVec<FrameQueueEntry, MAX_TRACKED_FRAMES>,
    next_cookie: FrameCookie,
    timeout: Duration,
}

impl FrameTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: BoundedVec::new(),
            next_cookie: FrameCookie::FIRST,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Hands out the cookie for the next frame. Never zero.
    pub fn next_cookie(&mut self) -> FrameCookie {
        let cookie = self.next_cookie;
        self.next_cookie = cookie.next();
        cookie
    }

    /// Starts tracking a frame that was just handed to the radio. Gives the
    /// params back if the queue is full.
    pub fn track(
        &mut self,
        frame_cookie: FrameCookie,
        params: FrameParams,
        now: Instant,
    ) -> Result<(), FrameParams> {
        debug_assert!(
            !self.radio_slot_busy(),
            "frame {} tracked while another frame occupies the radio slot",
            frame_cookie
        );

        if self.entries.is_full() {
            return Err(params);
        }

        let entry = FrameQueueEntry {
            frame_cookie,
            channel_id: params.channel_id,
            sdu_part_cookies: params.payload_cookies,
            send_time: now,
            state: FrameState::SentToRadio,
        };
        // capacity checked above
        let _ = self.entries.push(entry);
        Ok(())
    }

    /// Moves tracked frames along according to a radio report. Frames that
    /// reached a terminal state are removed and returned in queue order.
    pub fn apply_report(&mut self, report: &RadioUplinkState) -> Vec<FrameOutcome> {
        for entry in self.entries.iter_mut() {
            let cookie = Some(entry.frame_cookie.get());

            if report.cookie_in_wait == cookie && entry.state == FrameState::SentToRadio {
                debug!("frame {} went to 'in_wait'", entry.frame_cookie);
                entry.state = FrameState::InWait;
            }
            if report.cookie_in_progress == cookie && entry.state.occupies_radio_slot() {
                debug!("frame {} went to 'in_progress'", entry.frame_cookie);
                entry.state = FrameState::InProgress;
            }
            if report.cookie_done == cookie {
                debug!("frame {} is radiated", entry.frame_cookie);
                entry.state = FrameState::Radiated;
            } else if report.cookie_failed == cookie {
                error!("frame {} radiation failed", entry.frame_cookie);
                entry.state = FrameState::Failed;
            }
        }

        self.remove_where(|entry| entry.state.is_terminal(), false)
    }

    /// Drops frames whose timeout elapsed, marking them failed.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<FrameOutcome> {
        let timeout = self.timeout;
        let mut outcomes = self.remove_where(|entry| entry.is_expired(now, timeout), true);
        for outcome in &mut outcomes {
            outcome.entry.state = FrameState::Failed;
        }
        outcomes
    }

    pub fn radio_slot_busy(&self) -> bool {
        self.entries.iter().any(|entry| entry.state.occupies_radio_slot())
    }

    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    pub fn get(&self, cookie: FrameCookie) -> Option<&FrameQueueEntry> {
        self.entries.iter().find(|entry| entry.frame_cookie == cookie)
    }

    pub fn entries(&self) -> &[FrameQueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_where(
        &mut self,
        predicate: impl Fn(&FrameQueueEntry) -> bool,
        timed_out: bool,
    ) -> Vec<FrameOutcome> {
        let mut removed = Vec::new();
        self.entries.retain(|entry| {
            if predicate(entry) {
                removed.push(FrameOutcome { entry: entry.clone(), timed_out });
                false
            } else {
                true
            }
        });
        removed
    }
}
