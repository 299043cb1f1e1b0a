use crate::network::TransportType;
use crate::utilities::configuration::TransportConfigParams;

use std::io;
use std::time::Duration;
use thiserror::Error;

#[cfg(unix)]
pub mod ipc;
pub mod tcp;
#[cfg(feature = "zmq-transport")]
pub mod zmq;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("[TransportError] Transport is not connected")]
    NotConnected,
    #[error("[TransportError] Connect to {address} failed: {reason}")]
    ConnectError { address: String, reason: String },
    #[error("[TransportError] Receive timed out")]
    TimedOut,
    #[error("[TransportError] I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("[TransportError] ZeroMQ error: {0}")]
    ZmqError(String),
    #[error("[TransportError] Transport `{0}` is not available in this build")]
    UnsupportedTransport(TransportType),
}

impl TransportError {
    /// Maps the error kinds std sockets use for an expired read timeout.
    pub(crate) fn from_read_error(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::TimedOut,
            _ => Self::IoError(err),
        }
    }
}

/// A connected, ordered byte stream to the peer agent.
///
/// `receive` may return fewer bytes than requested; callers loop until they have what they
/// need. A return of `Ok(0)` means the peer closed its side. `timeout` of `None` blocks
/// indefinitely.
pub trait Transport: Send {
    fn connect(&mut self) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
    fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError>;
    fn disconnect(&mut self);
    fn peer_address(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> Result<(), TransportError> {
        (**self).connect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        (**self).receive(buf, timeout)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn peer_address(&self) -> String {
        (**self).peer_address()
    }
}

/// std sockets reject a zero read timeout, so the shortest wait is clamped to 1ms.
pub(crate) fn clamp_read_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.map(|t| t.max(Duration::from_millis(1)))
}

/// Builds an unconnected transport for the configured protocol and address.
pub fn transport_factory(
    config: &TransportConfigParams,
) -> Result<Box<dyn Transport>, TransportError> {
    let connect_timeout = config.connect_timeout();
    match config.transport {
        TransportType::TCP => Ok(Box::new(tcp::TcpTransport::new(
            config.address.socket_address(),
            connect_timeout,
        ))),
        #[cfg(unix)]
        TransportType::IPC => Ok(Box::new(ipc::IpcTransport::new(&config.address.host))),
        #[cfg(feature = "zmq-transport")]
        TransportType::ZMQ => Ok(Box::new(zmq::ZmqTransport::new(config.address.endpoint()))),
        #[allow(unreachable_patterns)]
        other => Err(TransportError::UnsupportedTransport(other)),
    }
}
