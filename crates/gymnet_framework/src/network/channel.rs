use crate::network::framing::{read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_BYTES};
use crate::network::transport::{Transport, TransportError};
use crate::utilities::configuration::TransportConfigParams;
use crate::utilities::observability::metrics::MetricsManager;

use gymnet_types::prelude::{CodecConfig, CodecError, EnvelopeCodec, Reply, Request};

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Truncated message: peer closed before sending a frame")]
    PeerClosed,
    #[error("Truncated message: peer closed after {received} of {expected} bytes")]
    TruncatedMessage { expected: usize, received: usize },
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("Malformed envelope: {0}")]
    Codec(#[from] CodecError),
    #[error("Out-of-order exchange: {0}")]
    OutOfOrder(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("[ChannelError] Connection error: {0}")]
    ConnectionError(#[from] TransportError),
    #[error("[ChannelError] Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),
    #[error("[ChannelError] No reply within {0:?}")]
    TimeoutError(Duration),
    #[error("[ChannelError] Channel busy with request {in_flight:?}")]
    ChannelBusy { in_flight: Option<i64> },
}

impl ChannelError {
    /// Peer hung up between exchanges, before sending any byte of a new frame.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, ChannelError::ProtocolError(ProtocolError::PeerClosed))
    }
}

impl From<FrameError> for ChannelError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Transport(e) => ChannelError::ConnectionError(e),
            FrameError::Closed => ProtocolError::PeerClosed.into(),
            FrameError::Truncated { expected, received } => {
                ProtocolError::TruncatedMessage { expected, received }.into()
            }
            FrameError::TooLarge { len, max } => ProtocolError::FrameTooLarge { len, max }.into(),
            FrameError::TimedOut(budget) => ChannelError::TimeoutError(budget),
        }
    }
}

impl From<CodecError> for ChannelError {
    fn from(err: CodecError) -> Self {
        ChannelError::ProtocolError(ProtocolError::Codec(err))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelParams {
    /// Wall-clock budget for a complete reply frame; `None` blocks indefinitely.
    pub reply_timeout: Option<Duration>,
    pub max_frame_bytes: usize,
    pub codec: CodecConfig,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            reply_timeout: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            codec: CodecConfig::default(),
        }
    }
}

impl From<&TransportConfigParams> for ChannelParams {
    fn from(config: &TransportConfigParams) -> Self {
        Self {
            reply_timeout: config.reply_timeout(),
            max_frame_bytes: config.max_frame_bytes,
            codec: CodecConfig::new(config.wire_format).with_max_depth(config.max_value_depth),
        }
    }
}

/// Clears the in-flight marker when an exchange ends, however it ends.
struct InFlightGuard<'a> {
    active: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn enter(active: &'a AtomicBool, id_slot: &AtomicI64, request_id: i64) -> Self {
        id_slot.store(request_id, Ordering::SeqCst);
        active.store(true, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Blocking request/reply channel to one peer agent.
///
/// At most one request is in flight at any instant: `communicate` queues concurrent callers
/// behind a single critical section, `try_communicate` rejects them instead. Failures are
/// never retried here.
///
/// After a timeout, a truncated or oversized frame, or a transport failure, the transport is
/// dropped so a late reply can never be read as the answer to a later request. Call
/// [`reconnect`](Self::reconnect) to resume.
pub struct ConnectionChannel<T: Transport> {
    channel_id: Uuid,
    transport: Mutex<T>,
    params: ChannelParams,
    codec: EnvelopeCodec,
    busy: AtomicBool,
    in_flight_id: AtomicI64,
    exchanges: AtomicU64,
    metrics: Option<Arc<MetricsManager>>,
}

impl<T: Transport> ConnectionChannel<T> {
    pub fn new(transport: T, params: ChannelParams) -> Self {
        Self {
            channel_id: Uuid::new_v4(),
            transport: Mutex::new(transport),
            codec: EnvelopeCodec::new(params.codec),
            params,
            busy: AtomicBool::new(false),
            in_flight_id: AtomicI64::new(0),
            exchanges: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsManager>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn params(&self) -> &ChannelParams {
        &self.params
    }

    /// Number of exchanges completed with a decoded reply.
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    /// Id of the request currently awaiting its reply.
    pub fn in_flight(&self) -> Option<i64> {
        self.busy
            .load(Ordering::SeqCst)
            .then(|| self.in_flight_id.load(Ordering::SeqCst))
    }

    pub fn connect(&self) -> Result<(), ChannelError> {
        let mut transport = self.lock_transport();
        if let Err(e) = transport.connect() {
            let err = ChannelError::ConnectionError(e);
            self.record_failure_metric(&err);
            return Err(err);
        }
        log::info!(
            "[ConnectionChannel {}] Connected to {}",
            self.channel_id,
            transport.peer_address()
        );
        Ok(())
    }

    /// Drops any existing stream and connects afresh.
    pub fn reconnect(&self) -> Result<(), ChannelError> {
        let mut transport = self.lock_transport();
        transport.disconnect();
        transport.connect()?;
        log::info!(
            "[ConnectionChannel {}] Reconnected to {}",
            self.channel_id,
            transport.peer_address()
        );
        Ok(())
    }

    pub fn disconnect(&self) {
        self.lock_transport().disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.lock_transport().is_connected()
    }

    pub fn peer_address(&self) -> String {
        self.lock_transport().peer_address()
    }

    /// Sends `request` and blocks until its reply arrives, the reply budget runs out, or the
    /// exchange fails. Concurrent callers wait their turn.
    pub fn communicate(&self, request: &Request) -> Result<Reply, ChannelError> {
        let mut transport = self.lock_transport();
        self.exchange(&mut transport, request)
    }

    /// Like [`communicate`](Self::communicate), but fails with `ChannelBusy` instead of
    /// waiting when another exchange holds the channel.
    pub fn try_communicate(&self, request: &Request) -> Result<Reply, ChannelError> {
        let mut transport = match self.transport.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(ChannelError::ChannelBusy {
                    in_flight: self.in_flight(),
                });
            }
        };
        self.exchange(&mut transport, request)
    }

    fn lock_transport(&self) -> MutexGuard<'_, T> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exchange(&self, transport: &mut T, request: &Request) -> Result<Reply, ChannelError> {
        if !transport.is_connected() {
            let err = ChannelError::ConnectionError(TransportError::NotConnected);
            self.record_failure_metric(&err);
            return Err(err);
        }

        let payload = self
            .codec
            .encode_request(request)
            .map_err(|e| self.fail(request.id, e.into()))?;
        let _guard = InFlightGuard::enter(&self.busy, &self.in_flight_id, request.id);
        let started = Instant::now();

        let frame = match write_frame(transport, &payload, self.params.max_frame_bytes) {
            // Nothing reached the wire.
            Err(err @ FrameError::TooLarge { .. }) => return Err(self.fail(request.id, err.into())),
            Err(err) => Err(err),
            Ok(()) => read_frame(
                transport,
                self.params.max_frame_bytes,
                self.params.reply_timeout,
            ),
        };

        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(err) => {
                transport.disconnect();
                return Err(self.fail(request.id, err.into()));
            }
        };

        let reply = self
            .codec
            .decode_reply(&bytes)
            .map_err(|e| self.fail(request.id, e.into()))?;

        let elapsed = started.elapsed();
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.record_exchange(elapsed);
        }
        log::debug!(
            "[ConnectionChannel {}] Request {} answered in {:?}",
            self.channel_id,
            request.id,
            elapsed
        );
        Ok(reply)
    }

    fn fail(&self, request_id: i64, err: ChannelError) -> ChannelError {
        log::warn!(
            "[ConnectionChannel {}] Request {} failed: {}",
            self.channel_id,
            request_id,
            err
        );
        self.record_failure_metric(&err);
        err
    }

    fn record_failure_metric(&self, err: &ChannelError) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match err {
            ChannelError::ConnectionError(_) => metrics.record_connection_error(),
            ChannelError::ProtocolError(_) => metrics.record_protocol_error(),
            ChannelError::TimeoutError(_) => metrics.record_timeout(),
            ChannelError::ChannelBusy { .. } => {}
        }
    }
}
