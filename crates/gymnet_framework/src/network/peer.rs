use crate::network::channel::{ChannelError, ChannelParams, ProtocolError};
use crate::network::framing::{read_frame, write_frame};
use crate::network::transport::tcp::TcpTransport;
use crate::network::transport::{Transport, TransportError};

use gymnet_types::prelude::{EnvelopeCodec, Reply, Request};

use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::time::Duration;

/// Decision logic of a peer agent: one reply per request.
pub trait Policy {
    fn act(&mut self, request: &Request) -> Reply;
}

impl<F> Policy for F
where
    F: FnMut(&Request) -> Reply,
{
    fn act(&mut self, request: &Request) -> Reply {
        self(request)
    }
}

/// Listening socket of a peer agent waiting for a gym entity to connect.
pub struct AgentListener {
    listener: TcpListener,
    params: ChannelParams,
}

impl AgentListener {
    pub fn bind(addr: impl ToSocketAddrs, params: ChannelParams) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        log::info!("[AgentListener] Listening on {}", listener.local_addr()?);
        Ok(Self { listener, params })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Blocks until one entity connects.
    pub fn accept(&self) -> Result<AgentSession<TcpTransport>, TransportError> {
        let (stream, addr) = self.listener.accept()?;
        log::info!("[AgentListener] Entity connected from {}", addr);
        Ok(AgentSession::new(TcpTransport::from_stream(stream)?, self.params))
    }
}

/// Agent side of one connection. Enforces strict alternation: a request must be answered
/// before the next one is read, and a reply can only follow a request.
pub struct AgentSession<T: Transport> {
    transport: T,
    codec: EnvelopeCodec,
    max_frame_bytes: usize,
    request_timeout: Option<Duration>,
    pending: Option<i64>,
    served: u64,
}

impl<T: Transport> AgentSession<T> {
    pub fn new(transport: T, params: ChannelParams) -> Self {
        Self {
            transport,
            codec: EnvelopeCodec::new(params.codec),
            max_frame_bytes: params.max_frame_bytes,
            request_timeout: None,
            pending: None,
            served: 0,
        }
    }

    /// Bounds how long `receive_request` waits; `None` waits indefinitely.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.request_timeout = timeout;
    }

    /// Id of the request that still owes a reply.
    pub fn pending(&self) -> Option<i64> {
        self.pending
    }

    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn receive_request(&mut self) -> Result<Request, ChannelError> {
        if let Some(id) = self.pending {
            return Err(ProtocolError::OutOfOrder(format!(
                "request {} has not been answered yet",
                id
            ))
            .into());
        }
        let bytes = read_frame(&mut self.transport, self.max_frame_bytes, self.request_timeout)?;
        let request = self.codec.decode_request(&bytes)?;
        self.pending = Some(request.id);
        Ok(request)
    }

    pub fn send_reply(&mut self, reply: &Reply) -> Result<(), ChannelError> {
        let Some(id) = self.pending else {
            return Err(
                ProtocolError::OutOfOrder("reply without a pending request".to_string()).into(),
            );
        };
        let payload = self.codec.encode_reply(reply)?;
        write_frame(&mut self.transport, &payload, self.max_frame_bytes)?;
        self.pending = None;
        self.served += 1;
        log::debug!("[AgentSession] Answered request {}", id);
        Ok(())
    }

    /// Answers exactly one request and returns its id.
    pub fn serve_one<P: Policy + ?Sized>(&mut self, policy: &mut P) -> Result<i64, ChannelError> {
        let request = self.receive_request()?;
        let reply = policy.act(&request);
        self.send_reply(&reply)?;
        Ok(request.id)
    }

    /// Answers requests until `limit` is reached or the entity closes its side between
    /// exchanges. Returns how many requests were answered.
    pub fn serve<P: Policy + ?Sized>(
        &mut self,
        policy: &mut P,
        limit: Option<u64>,
    ) -> Result<u64, ChannelError> {
        let mut answered = 0;
        while limit.map_or(true, |max| answered < max) {
            match self.serve_one(policy) {
                Ok(_) => answered += 1,
                Err(e) if e.is_clean_close() => {
                    log::info!("[AgentSession] Entity closed the connection");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(answered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::framing::tests::ScriptedTransport;
    use gymnet_types::prelude::Value;

    fn framed_request(id: i64) -> Vec<u8> {
        let payload = EnvelopeCodec::default()
            .encode_request(&Request::new(id, Value::empty_dict(), Value::scalar(0.0)))
            .unwrap();
        let mut bytes = (payload.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&payload);
        bytes
    }

    #[test]
    fn test_reply_without_request_is_out_of_order() {
        let mut session = AgentSession::new(ScriptedTransport::new(vec![]), ChannelParams::default());
        assert!(matches!(
            session.send_reply(&Reply::empty()),
            Err(ChannelError::ProtocolError(ProtocolError::OutOfOrder(_)))
        ));
    }

    #[test]
    fn test_second_receive_before_reply_is_out_of_order() {
        let transport = ScriptedTransport::new(vec![framed_request(1), framed_request(2)]);
        let mut session = AgentSession::new(transport, ChannelParams::default());

        assert_eq!(session.receive_request().unwrap().id, 1);
        assert_eq!(session.pending(), Some(1));
        assert!(matches!(
            session.receive_request(),
            Err(ChannelError::ProtocolError(ProtocolError::OutOfOrder(_)))
        ));
    }

    #[test]
    fn test_serve_stops_on_clean_close() {
        let transport = ScriptedTransport::new(vec![framed_request(1), framed_request(2)]);
        let mut session = AgentSession::new(transport, ChannelParams::default());
        let mut seen = Vec::new();
        let mut policy = |request: &Request| {
            seen.push(request.id);
            Reply::empty()
        };

        assert_eq!(session.serve(&mut policy, None).unwrap(), 2);
        assert_eq!(session.served(), 2);
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_serve_respects_limit() {
        let transport = ScriptedTransport::new(vec![framed_request(1), framed_request(2)]);
        let mut session = AgentSession::new(transport, ChannelParams::default());
        let mut policy = |_: &Request| Reply::empty();
        assert_eq!(session.serve(&mut policy, Some(1)).unwrap(), 1);
        assert_eq!(session.pending(), None);
    }

    #[test]
    fn test_serve_fails_when_request_is_cut_after_header() {
        let transport = ScriptedTransport::new(vec![4u32.to_be_bytes().to_vec()]);
        let mut session = AgentSession::new(transport, ChannelParams::default());
        let mut policy = |_: &Request| Reply::empty();

        assert!(matches!(
            session.serve(&mut policy, None),
            Err(ChannelError::ProtocolError(ProtocolError::TruncatedMessage {
                expected: 4,
                received: 0
            }))
        ));
        assert_eq!(session.served(), 0);
    }
}
