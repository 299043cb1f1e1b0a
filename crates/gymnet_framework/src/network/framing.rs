//! Length-prefixed framing.
//!
//! ```text
//! +----------------------+---------------------+
//! | u32 length (BE, 4 B) | payload (length B)  |
//! +----------------------+---------------------+
//! ```

use crate::network::transport::{Transport, TransportError};

use std::time::{Duration, Instant};
use thiserror::Error;

pub const FRAME_HEADER_LEN: usize = 4;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Peer closed the stream before a new frame")]
    Closed,
    #[error("Peer closed the stream after {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("No complete frame within {0:?}")]
    TimedOut(Duration),
}

impl FrameError {
    /// The peer closed cleanly before sending any byte of a new frame.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, FrameError::Closed)
    }
}

/// Writes `payload` with its length prefix as a single contiguous send.
pub fn write_frame<T: Transport + ?Sized>(
    transport: &mut T,
    payload: &[u8],
    max_frame_bytes: usize,
) -> Result<(), FrameError> {
    if payload.len() > max_frame_bytes || payload.len() > u32::MAX as usize {
        return Err(FrameError::TooLarge {
            len: payload.len(),
            max: max_frame_bytes,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    transport.send(&frame)?;
    Ok(())
}

/// Reads one frame, tolerating arbitrarily small partial reads.
///
/// `timeout` bounds the whole frame, not each individual read.
pub fn read_frame<T: Transport + ?Sized>(
    transport: &mut T,
    max_frame_bytes: usize,
    timeout: Option<Duration>,
) -> Result<Vec<u8>, FrameError> {
    let deadline = timeout.map(|t| (t, Instant::now() + t));

    let mut header = [0u8; FRAME_HEADER_LEN];
    match read_exact(transport, &mut header, deadline) {
        Err(FrameError::Truncated { received: 0, .. }) => return Err(FrameError::Closed),
        result => result?,
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_bytes {
        return Err(FrameError::TooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; len];
    read_exact(transport, &mut payload, deadline)?;
    Ok(payload)
}

fn read_exact<T: Transport + ?Sized>(
    transport: &mut T,
    buf: &mut [u8],
    deadline: Option<(Duration, Instant)>,
) -> Result<(), FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        let remaining = match deadline {
            Some((budget, at)) => {
                let now = Instant::now();
                if now >= at {
                    return Err(FrameError::TimedOut(budget));
                }
                Some(at - now)
            }
            None => None,
        };

        match transport.receive(&mut buf[filled..], remaining) {
            Ok(0) => {
                return Err(FrameError::Truncated {
                    expected: buf.len(),
                    received: filled,
                });
            }
            Ok(n) => filled += n,
            Err(TransportError::TimedOut) => {
                let budget = deadline.map(|(b, _)| b).unwrap_or_default();
                return Err(FrameError::TimedOut(budget));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory transport that hands out scripted chunks, then EOF.
    pub(crate) struct ScriptedTransport {
        pub(crate) chunks: VecDeque<Vec<u8>>,
        pub(crate) sent: Vec<Vec<u8>>,
        pub(crate) connected: bool,
        pub(crate) stall_when_empty: bool,
    }

    impl ScriptedTransport {
        pub(crate) fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into(),
                sent: Vec::new(),
                connected: true,
                stall_when_empty: false,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn connect(&mut self) -> Result<(), TransportError> {
            self.connected = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }
            self.sent.push(bytes.to_vec());
            Ok(())
        }

        fn receive(
            &mut self,
            buf: &mut [u8],
            _timeout: Option<Duration>,
        ) -> Result<usize, TransportError> {
            match self.chunks.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(chunk.split_off(n));
                    }
                    Ok(n)
                }
                None if self.stall_when_empty => Err(TransportError::TimedOut),
                None => Ok(0),
            }
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn peer_address(&self) -> String {
            "scripted".to_string()
        }
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut bytes = (payload.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_write_frame_is_one_contiguous_send() {
        let mut transport = ScriptedTransport::new(vec![]);
        write_frame(&mut transport, b"payload", DEFAULT_MAX_FRAME_BYTES).unwrap();
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(transport.sent[0], framed(b"payload"));
    }

    #[test]
    fn test_read_frame_reassembles_byte_by_byte() {
        let bytes = framed(b"hello gym");
        let chunks = bytes.iter().map(|b| vec![*b]).collect();
        let mut transport = ScriptedTransport::new(chunks);
        let payload = read_frame(&mut transport, DEFAULT_MAX_FRAME_BYTES, None).unwrap();
        assert_eq!(payload, b"hello gym");
    }

    #[test]
    fn test_read_frame_empty_payload() {
        let mut transport = ScriptedTransport::new(vec![framed(b"")]);
        let payload = read_frame(&mut transport, DEFAULT_MAX_FRAME_BYTES, None).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_close_mid_payload_is_truncated() {
        let bytes = framed(b"0123456789");
        let mut transport = ScriptedTransport::new(vec![bytes[..7].to_vec()]);
        match read_frame(&mut transport, DEFAULT_MAX_FRAME_BYTES, None) {
            Err(FrameError::Truncated { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 3);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_close_before_header_is_clean_close() {
        let mut transport = ScriptedTransport::new(vec![]);
        let err = read_frame(&mut transport, DEFAULT_MAX_FRAME_BYTES, None).unwrap_err();
        assert!(err.is_clean_close());

        let mut transport = ScriptedTransport::new(vec![vec![0, 0]]);
        let err = read_frame(&mut transport, DEFAULT_MAX_FRAME_BYTES, None).unwrap_err();
        assert!(!err.is_clean_close());
    }

    #[test]
    fn test_close_after_four_byte_header_is_truncation() {
        let mut transport = ScriptedTransport::new(vec![4u32.to_be_bytes().to_vec()]);
        let err = read_frame(&mut transport, DEFAULT_MAX_FRAME_BYTES, None).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 4,
                received: 0
            }
        ));
        assert!(!err.is_clean_close());
    }

    #[test]
    fn test_oversized_frames_rejected_both_ways() {
        let mut transport = ScriptedTransport::new(vec![framed(&[0u8; 64])]);
        assert!(matches!(
            read_frame(&mut transport, 16, None),
            Err(FrameError::TooLarge { len: 64, max: 16 })
        ));

        let mut transport = ScriptedTransport::new(vec![]);
        assert!(matches!(
            write_frame(&mut transport, &[0u8; 64], 16),
            Err(FrameError::TooLarge { .. })
        ));
        assert!(transport.sent.is_empty());
    }

    #[test]
    fn test_stalled_peer_times_out() {
        let bytes = framed(b"abc");
        let mut transport = ScriptedTransport::new(vec![bytes[..2].to_vec()]);
        transport.stall_when_empty = true;
        let timeout = Duration::from_millis(50);
        assert!(matches!(
            read_frame(&mut transport, DEFAULT_MAX_FRAME_BYTES, Some(timeout)),
            Err(FrameError::TimedOut(t)) if t == timeout
        ));
    }
}
