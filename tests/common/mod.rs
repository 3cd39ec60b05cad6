#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use uslpbus::protocol::{OutboundMessage, RadioUplinkState, SduEventKind, SduUplinkEvent};
use uslpbus::stack::{FrameParams, InputStack, MapSduEvent, OutputStack, PartCookies};
use uslpbus::*;

pub const FRAME_SIZE: usize = 16;
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Output stack that turns every accepted SDU into `parts_per_sdu` frames.
pub struct ScriptedOutput {
    pub channels: Vec<ChannelId>,
    pub parts_per_sdu: u32,
    pub submitted: Vec<(ChannelId, PayloadCookie, Vec<u8>, Qos)>,
    pub refuse_with: Option<StackError>,
    frames: VecDeque<FrameParams>,
}

impl ScriptedOutput {
    pub fn new(channels: &[ChannelId]) -> Self {
        Self {
            channels: channels.to_vec(),
            parts_per_sdu: 1,
            submitted: Vec::new(),
            refuse_with: None,
            frames: VecDeque::new(),
        }
    }

    pub fn queued_frames(&self) -> usize {
        self.frames.len()
    }
}

impl OutputStack for ScriptedOutput {
    fn frame_size(&self) -> usize {
        FRAME_SIZE
    }

    fn has_map_channel(&self, channel_id: ChannelId) -> bool {
        self.channels.contains(&channel_id)
    }

    fn submit_sdu(
        &mut self,
        channel_id: ChannelId,
        cookie: PayloadCookie,
        data: &[u8],
        qos: Qos,
    ) -> Result<(), StackError> {
        if let Some(e) = &self.refuse_with {
            return Err(e.clone());
        }
        self.submitted.push((channel_id, cookie, data.to_vec(), qos));

        // all parts of one sdu ride in a single frame
        let mut payload_cookies = PartCookies::new();
        for part_no in 0..self.parts_per_sdu {
            payload_cookies.push(PayloadPartCookie {
                cookie,
                part_no,
                is_final: part_no + 1 == self.parts_per_sdu,
            });
        }
        self.frames.push_back(FrameParams {
            channel_id,
            payload_cookies,
            frame_seq_no: None,
        });
        Ok(())
    }

    fn peek_frame(&self) -> Option<FrameParams> {
        self.frames.front().cloned()
    }

    fn pop_frame(&mut self, buf: &mut [u8]) -> Result<FrameParams, StackError> {
        if buf.len() != FRAME_SIZE {
            return Err(StackError::FrameSizeMismatch { expected: FRAME_SIZE, given: buf.len() });
        }
        let params = self.frames.pop_front().ok_or(StackError::NoFrameReady)?;
        buf.fill(params.channel_id.map_id);
        Ok(params)
    }
}

/// Input stack that hands every pushed frame back as one SDU.
#[derive(Default)]
pub struct EchoInput {
    pub events: Vec<MapSduEvent>,
    pub pushed: usize,
}

impl InputStack for EchoInput {
    fn push_frame(
        &mut self,
        data: &[u8],
        on_sdu: &mut dyn FnMut(MapSduEvent),
    ) -> Result<(), StackError> {
        self.pushed += 1;
        for event in self.events.drain(..) {
            on_sdu(event);
        }
        if data.is_empty() {
            return Err(StackError::BadFrame("empty frame".to_string()));
        }
        Ok(())
    }
}

pub fn scripted_dispatcher(channels: &[ChannelId]) -> Dispatcher<ScriptedOutput, EchoInput> {
    Dispatcher::new(
        ScriptedOutput::new(channels),
        EchoInput::default(),
        DispatcherConfig { frame_timeout: TIMEOUT },
    )
}

pub fn cookie(value: u64) -> FrameCookie {
    FrameCookie::new(value).expect("non-zero cookie")
}

pub fn report(
    in_wait: Option<u64>,
    in_progress: Option<u64>,
    done: Option<u64>,
    failed: Option<u64>,
) -> RadioUplinkState {
    RadioUplinkState {
        cookie_in_wait: in_wait,
        cookie_in_progress: in_progress,
        cookie_done: done,
        cookie_failed: failed,
    }
}

/// A report saying the radio has room and nothing else.
pub fn idle_report() -> RadioUplinkState {
    RadioUplinkState::default()
}

pub fn sdu_events(messages: &[OutboundMessage]) -> Vec<&SduUplinkEvent> {
    messages
        .iter()
        .filter_map(|message| match message {
            OutboundMessage::SduUplinkEvent(event) => Some(event),
            _ => None,
        })
        .collect()
}

pub fn events_of_kind(messages: &[OutboundMessage], kind: SduEventKind) -> Vec<&SduUplinkEvent> {
    sdu_events(messages).into_iter().filter(|event| event.event == kind).collect()
}

pub fn sent_frame_cookies(messages: &[OutboundMessage]) -> Vec<FrameCookie> {
    messages
        .iter()
        .filter_map(|message| match message {
            OutboundMessage::RadioUplinkFrame(frame) => Some(frame.cookie),
            _ => None,
        })
        .collect()
}

pub fn at(start: Instant, millis: u64) -> Instant {
    start + Duration::from_millis(millis)
}
