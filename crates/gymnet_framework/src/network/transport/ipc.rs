use super::{clamp_read_timeout, Transport, TransportError};

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Unix domain stream socket transport, for an agent running on the same host.
pub struct IpcTransport {
    path: PathBuf,
    stream: Option<UnixStream>,
}

impl IpcTransport {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            stream: None,
        }
    }

    pub fn from_stream(stream: UnixStream, path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            stream: Some(stream),
        }
    }
}

impl Transport for IpcTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = UnixStream::connect(&self.path).map_err(|e| TransportError::ConnectError {
            address: self.peer_address(),
            reason: e.to_string(),
        })?;
        log::debug!("[IpcTransport] Connected to {}", self.path.display());
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
        }
    }

    fn peer_address(&self) -> String {
        format!("ipc://{}", self.path.display())
    }
}

impl Drop for IpcTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
