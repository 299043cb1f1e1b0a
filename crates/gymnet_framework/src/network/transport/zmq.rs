use super::{Transport, TransportError};

use std::time::Duration;
use zmq::{Context, Socket};

impl From<zmq::Error> for TransportError {
    fn from(err: zmq::Error) -> Self {
        TransportError::ZmqError(err.to_string())
    }
}

/// ZeroMQ REQ socket transport.
///
/// Each `send` travels as one ZeroMQ message. Incoming messages are buffered whole and handed
/// out in whatever chunk sizes `receive` asks for, so framing reads work unchanged. A REQ
/// socket that timed out waiting for its reply is unusable; the channel drops it and
/// `connect` builds a fresh one.
pub struct ZmqTransport {
    endpoint: String,
    context: Context,
    socket: Option<Socket>,
    pending: Vec<u8>,
    offset: usize,
}

impl ZmqTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            context: Context::new(),
            socket: None,
            pending: Vec::new(),
            offset: 0,
        }
    }

    fn create_req_socket(&self) -> Result<Socket, TransportError> {
        let socket = self.context.socket(zmq::REQ)?;
        socket.set_linger(0)?;
        socket
            .connect(&self.endpoint)
            .map_err(|e| TransportError::ConnectError {
                address: self.endpoint.clone(),
                reason: e.to_string(),
            })?;
        Ok(socket)
    }
}

impl Transport for ZmqTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Ok(());
        }
        self.socket = Some(self.create_req_socket()?);
        self.pending.clear();
        self.offset = 0;
        log::debug!("[ZmqTransport] REQ socket connected to {}", self.endpoint);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        socket.send(bytes, 0)?;
        Ok(())
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        if self.offset >= self.pending.len() {
            let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
            let timeout_ms = timeout
                .map(|t| t.as_millis().clamp(1, i64::MAX as u128) as i64)
                .unwrap_or(-1);
            if socket.poll(zmq::POLLIN, timeout_ms)? == 0 {
                return Err(TransportError::TimedOut);
            }
            self.pending = socket.recv_bytes(0)?;
            self.offset = 0;
        }

        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            log::debug!("[ZmqTransport] REQ socket to {} closed", self.endpoint);
        }
        self.pending.clear();
        self.offset = 0;
    }

    fn peer_address(&self) -> String {
        self.endpoint.clone()
    }
}
