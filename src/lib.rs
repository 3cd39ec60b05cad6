//! # USLP bus bridge
//!
//! Ground station bridge between the ZeroMQ message bus and a CCSDS USLP link
//! running over a single half-duplex radio.
//!
//! Bus clients ask for SDUs to be sent on a MAP channel. The bridge feeds them
//! into the USLP output stack, hands finished frames to the radio server one
//! at a time and follows every frame through the radio's reports until it is
//! radiated, failed or timed out. Downlink frames from the radio go through
//! the input stack and come back onto the bus as SDUs.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Instant;
//! use uslpbus::protocol::{InboundMessage, SduUplinkRequest};
//! use uslpbus::stack::{ground_input_stack, ground_output_stack, SPACECRAFT_ID};
//! use uslpbus::{ChannelId, Dispatcher, DispatcherConfig, EppHeader, Qos};
//!
//! let mut dispatcher = Dispatcher::new(
//!     ground_output_stack(),
//!     ground_input_stack(),
//!     DispatcherConfig::default(),
//! );
//!
//! let packet = EppHeader::wrap(uslpbus::epp::PROTOCOL_ID_PRIVATE, b"ping").unwrap();
//! dispatcher.dispatch(
//!     InboundMessage::SduUplinkRequest(SduUplinkRequest {
//!         channel_id: ChannelId::new(SPACECRAFT_ID, 0, 0),
//!         qos: Qos::Expedited,
//!         cookie: 1,
//!         data: packet,
//!     }),
//!     Instant::now(),
//! );
//!
//! for message in dispatcher.take_outbound() {
//!     println!("{}", message.kind());
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`dispatcher`] - Frame lifecycle state machine and message router
//! - [`frames`] - Tracking of frames handed to the radio
//! - [`protocol`] - Typed bus messages
//! - [`codec`] - Multipart wire format of bus messages
//! - [`bus`] - ZeroMQ sockets
//! - [`stack`] - USLP stack boundary and the in-process stack
//! - [`epp`] - Encapsulation packet headers

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
// error and panic sections are only written where they are not obvious
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

pub mod bus;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod epp;
pub mod error;
pub mod frames;
pub mod ids;
pub mod protocol;
pub mod shutdown;
pub mod stack;

pub use bus::BusChannel;
pub use codec::WireMessage;
pub use config::BridgeConfig;
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats};
pub use epp::EppHeader;
pub use error::{BusError, ConfigError, StackError};
pub use frames::{FrameQueueEntry, FrameState, FrameTracker};
pub use ids::{ChannelId, FrameCookie, PayloadCookie, PayloadPartCookie, Qos};
pub use protocol::{InboundMessage, OutboundMessage};
