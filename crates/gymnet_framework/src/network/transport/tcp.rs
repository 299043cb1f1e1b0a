use super::{clamp_read_timeout, Transport, TransportError};

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Plain TCP stream transport with Nagle disabled.
pub struct TcpTransport {
    address: String,
    connect_timeout: Option<Duration>,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>, connect_timeout: Option<Duration>) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            stream: None,
        }
    }

    /// Wraps an already-accepted stream (agent side).
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let address = stream.peer_addr()?.to_string();
        Ok(Self {
            address,
            connect_timeout: None,
            stream: Some(stream),
        })
    }

    fn open(&self) -> Result<TcpStream, TransportError> {
        let connect_error = |reason: String| TransportError::ConnectError {
            address: self.address.clone(),
            reason,
        };

        let addrs = self
            .address
            .to_socket_addrs()
            .map_err(|e| connect_error(e.to_string()))?;

        let mut last_error = String::from("address resolved to nothing");
        for addr in addrs {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        Err(connect_error(last_error))
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.open()?;
        log::debug!("[TcpTransport] Connected to {}", self.address);
        self.stream = Some(stream);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.set_read_timeout(clamp_read_timeout(timeout))?;
        loop {
            match stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::from_read_error(e)),
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            log::debug!("[TcpTransport] Disconnected from {}", self.address);
        }
    }

    fn peer_address(&self) -> String {
        self.address.clone()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_send_before_connect_fails() {
        let mut transport = TcpTransport::new("127.0.0.1:1", None);
        assert!(matches!(
            transport.send(b"hello"),
            Err(TransportError::NotConnected)
        ));
        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.receive(&mut buf, None),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_connect_refused_reports_address() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut transport = TcpTransport::new(address.clone(), Some(Duration::from_millis(200)));
        match transport.connect() {
            Err(TransportError::ConnectError { address: a, .. }) => assert_eq!(a, address),
            other => panic!("expected connect error, got {:?}", other.map(|_| ())),
        }
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_loopback_partial_reads_and_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"abcdef").unwrap();
        });

        let mut transport = TcpTransport::new(address, None);
        transport.connect().unwrap();
        peer.join().unwrap();

        let mut collected = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = transport
                .receive(&mut buf, Some(Duration::from_secs(2)))
                .unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"abcdef");
    }

    #[test]
    fn test_receive_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let mut transport = TcpTransport::new(address, None);
        transport.connect().unwrap();
        let (_held, _) = listener.accept().unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.receive(&mut buf, Some(Duration::from_millis(20))),
            Err(TransportError::TimedOut)
        ));
    }
}
