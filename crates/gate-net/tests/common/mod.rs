//! Fixtures shared by the gate-net integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gate_core::{AgentEvent, AgentNotice, AgentRef, ChannelDispatcher, FrameParser, RouteError, Router};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Echoes every `id + body` payload back to the sender unchanged.
pub struct EchoRouter;

#[async_trait]
impl Router for EchoRouter {
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

pub type Notices = mpsc::UnboundedReceiver<AgentNotice<Vec<u8>>>;

pub fn router() -> Arc<dyn Router<Message = Vec<u8>>> {
    Arc::new(EchoRouter)
}

pub fn dispatcher() -> (Arc<ChannelDispatcher<Vec<u8>>>, Notices) {
    let (dispatcher, notices) = ChannelDispatcher::channel();
    (Arc::new(dispatcher), notices)
}

/// `id + body` payload with a two-byte big-endian id.
pub fn payload(id: u16, body: &[u8]) -> Vec<u8> {
    let mut data = id.to_be_bytes().to_vec();
    data.extend_from_slice(body);
    data
}

/// Length-prefixed frame as the default parser writes it.
pub fn frame(id: u16, body: &[u8]) -> Vec<u8> {
    FrameParser::default()
        .encode_frame(&payload(id, body))
        .expect("frame fits")
}

/// Reads one frame with the default parser, failing the test after [`WAIT`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Vec<u8> {
    tokio::time::timeout(WAIT, FrameParser::default().read_frame(reader))
        .await
        .expect("frame arrives in time")
        .expect("frame decodes")
}

/// Waits for the next notice and returns its event.
pub async fn next_event(notices: &mut Notices) -> AgentEvent {
    tokio::time::timeout(WAIT, notices.recv())
        .await
        .expect("notice arrives in time")
        .expect("dispatcher alive")
        .event
}
