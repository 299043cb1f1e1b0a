use serde::{Deserialize, Serialize};
use std::fmt;

/// **Transport Modules**: byte-stream connections to the peer agent.
///
/// - `tcp`: std TCP stream
/// - `ipc`: Unix domain stream socket (unix only)
/// - `zmq`: ZeroMQ REQ socket (`zmq-transport` feature)
pub mod transport;

/// Length-prefixed framing over any [`transport::Transport`].
pub mod framing;

/// The blocking, one-in-flight request/reply channel used by entities.
pub mod channel;

/// Agent-side counterpart of the channel: accepts a connection and answers requests.
pub mod peer;

/// Extend for future utility with other transport protocols (extend transport accordingly)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    TCP,
    IPC,
    ZMQ,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TCP => write!(f, "tcp"),
            Self::IPC => write!(f, "ipc"),
            Self::ZMQ => write!(f, "zmq"),
        }
    }
}
