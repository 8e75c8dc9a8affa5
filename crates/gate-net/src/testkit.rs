//! Shared fixtures for the connection and server unit tests.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use gate_core::{AgentNotice, AgentRef, ChannelDispatcher, FrameParser, RouteError, Router};
use tokio::sync::mpsc;

use crate::server::{Collaborators, ServeContext, Transport};

/// Treats every payload as opaque bytes and echoes it to the sender.
pub(crate) struct EchoBytes;

#[async_trait]
impl Router for EchoBytes {
    type Message = Vec<u8>;

    async fn route(&self, msg: Vec<u8>, agent: AgentRef<Vec<u8>>) -> Result<(), RouteError> {
        agent.write_msg(msg).await;
        Ok(())
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Vec<u8>, RouteError> {
        Ok(data.to_vec())
    }

    fn marshal(&self, msg: &Vec<u8>) -> Result<Vec<u8>, RouteError> {
        Ok(msg.clone())
    }
}

/// Forwards routed payloads to a channel instead of answering.
pub(crate) struct Recorder {
    pub(crate) tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl Router for Recorder {
    type Message = Vec<u8>;

    async fn route(&self, msg: Vec<u8>, _agent: AgentRef<Vec<u8>>) -> Result<(), RouteError> {
        self.tx
            .send(msg)
            .map_err(|_| RouteError::Handler("recorder dropped".into()))
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Vec<u8>, RouteError> {
        Ok(data.to_vec())
    }

    fn marshal(&self, msg: &Vec<u8>) -> Result<Vec<u8>, RouteError> {
        Ok(msg.clone())
    }
}

pub(crate) type Notices = mpsc::UnboundedReceiver<AgentNotice<Vec<u8>>>;

/// Serving context with a default parser, the given router and a channel
/// dispatcher whose receiver is returned.
pub(crate) fn context<R>(router: R) -> (ServeContext<Vec<u8>>, Notices)
where
    R: Router<Message = Vec<u8>>,
{
    let (dispatcher, notices) = ChannelDispatcher::channel();
    let collab = Collaborators {
        router: Some(Arc::new(router) as Arc<dyn Router<Message = Vec<u8>>>),
        parser: Some(FrameParser::default()),
        dispatcher: Some(Arc::new(dispatcher)),
    };
    match collab.serve_context(Transport::Tcp, true) {
        Ok(ctx) => (ctx, notices),
        Err(e) => panic!("test context: {e}"),
    }
}

pub(crate) fn local() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3563))
}

pub(crate) fn remote() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 50_000))
}
