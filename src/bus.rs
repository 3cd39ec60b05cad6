//! Bus channel: a SUB socket for inbound messages and a PUB socket for
//! outbound ones, both connected to the external broker.

use crate::codec::WireMessage;
use crate::error::BusError;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeromq::{PubSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

#[derive(Default)]
pub struct BusChannel {
    sub: Option<SubSocket>,
    publisher: Option<PubSocket>,
    // received by poll, decoded by receive
    pending: Option<ZmqMessage>,
}

impl BusChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects the subscribe socket and subscribes to every topic prefix in
    /// `topics`.
    pub async fn connect_subscribe(
        &mut self,
        endpoint: &str,
        topics: &[&str],
    ) -> Result<(), BusError> {
        let mut socket = SubSocket::new();
        socket.connect(endpoint).await?;
        for topic in topics {
            socket.subscribe(topic).await?;
            debug!("subscribed to '{}'", topic);
        }
        info!("subscribe socket connected to {}", endpoint);

        self.sub = Some(socket);
        Ok(())
    }

    pub async fn connect_publish(&mut self, endpoint: &str) -> Result<(), BusError> {
        let mut socket = PubSocket::new();
        socket.connect(endpoint).await?;
        info!("publish socket connected to {}", endpoint);

        self.publisher = Some(socket);
        Ok(())
    }

    /// Waits up to `timeout` for an inbound message. `Ok(false)` means nothing
    /// arrived in time.
    pub async fn poll(&mut self, timeout: Duration) -> Result<bool, BusError> {
        if self.pending.is_some() {
            return Ok(true);
        }
        let socket = self.sub.as_mut().ok_or(BusError::NotConnected("subscribe"))?;

        match tokio::time::timeout(timeout, socket.recv()).await {
            Ok(Ok(message)) => {
                self.pending = Some(message);
                Ok(true)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(false),
        }
    }

    /// Decodes the message picked up by the last successful [`poll`].
    /// `Ok(None)` when there is none or it had an empty part.
    ///
    /// [`poll`]: BusChannel::poll
    pub fn receive<M: WireMessage>(&mut self) -> Result<Option<M>, BusError> {
        match self.pending.take() {
            Some(message) => M::from_parts(message.into_vec()),
            None => Ok(None),
        }
    }

    pub async fn send<M: WireMessage>(&mut self, message: &M) -> Result<(), BusError> {
        let socket = self.publisher.as_mut().ok_or(BusError::NotConnected("publish"))?;

        let mut parts = message.to_parts()?.into_iter();
        let topic = parts
            .next()
            .ok_or_else(|| BusError::MalformedMessage("message without topic".to_string()))?;
        let mut zmq_message = ZmqMessage::from(topic);
        for part in parts {
            zmq_message.push_back(part);
        }

        socket.send(zmq_message).await?;
        Ok(())
    }

    pub async fn close(mut self) {
        if let Some(socket) = self.sub.take() {
            for e in socket.close().await {
                warn!("error closing subscribe socket: {:?}", e);
            }
        }
        if let Some(socket) = self.publisher.take() {
            for e in socket.close().await {
                warn!("error closing publish socket: {:?}", e);
            }
        }
        debug!("bus channel closed");
    }
}
