//! WebSocket connection.
//!
//! A WebSocket message already has boundaries, so no length header is sent:
//! each binary message carries exactly one `id + body` payload.  Sends wait
//! for queue space rather than failing, which pushes backpressure onto the
//! caller.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gate_core::{Agent, AgentEvent, AgentRef, FrameParser, JobDispatcher, Router, UserData};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error};

use crate::admission::AdmissionPermit;
use crate::lifecycle::ConnLifecycle;
use crate::link::Link;
use crate::server::ServeContext;

/// How long a closing connection may spend sending its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// One upgraded client socket.
pub struct WsConn<M: Send + 'static> {
    life: ConnLifecycle,
    tx: mpsc::Sender<Vec<u8>>,
    parser: FrameParser,
    router: Arc<dyn Router<Message = M>>,
    dispatcher: Option<Arc<dyn JobDispatcher<M>>>,
    this: Weak<Self>,
}

impl<M: Send + 'static> WsConn<M> {
    pub(crate) fn spawn<S: Link>(
        ws: WebSocketStream<S>,
        local: SocketAddr,
        remote: SocketAddr,
        permit: AdmissionPermit,
        ctx: &ServeContext<M>,
        pending_write_num: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(pending_write_num);
        let conn = Arc::new_cyclic(|this| Self {
            life: ConnLifecycle::new(ctx.shutdown.child_token(), permit, local, remote),
            tx,
            parser: ctx.parser,
            router: Arc::clone(&ctx.router),
            dispatcher: ctx.dispatcher.clone(),
            this: this.clone(),
        });
        debug!(conn = %conn.life.id(), %remote, "ws connection opened");

        if let Some(dispatcher) = &conn.dispatcher {
            dispatcher.go(AgentEvent::NewAgent, conn.clone());
        }

        let (sink, stream) = ws.split();
        ctx.tracker.spawn(Arc::clone(&conn).read_loop(stream));
        ctx.tracker.spawn(Arc::clone(&conn).write_loop(sink, rx));
        conn
    }

    async fn read_loop<S: Link>(self: Arc<Self>, mut stream: SplitStream<WebSocketStream<S>>) {
        let token = self.life.token().clone();
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = stream.next() => next,
            };
            let data = match next {
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(conn = %self.life.id(), error = %e, "read message failed");
                    break;
                }
            };

            let msg = match self.parser.unmarshal_payload(self.router.as_ref(), &data) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(conn = %self.life.id(), error = %e, "unmarshal message failed");
                    break;
                }
            };
            let agent: AgentRef<M> = self.clone();
            let routed = tokio::select! {
                _ = token.cancelled() => break,
                res = self.router.route(msg, agent) => res,
            };
            if let Err(e) = routed {
                error!(conn = %self.life.id(), error = %e, "route message failed");
                break;
            }
        }
        self.close();
    }

    async fn write_loop<S: Link>(
        self: Arc<Self>,
        mut sink: SplitSink<WebSocketStream<S>, Message>,
        mut rx: mpsc::Receiver<Vec<u8>>,
    ) {
        let token = self.life.token().clone();
        loop {
            let data = tokio::select! {
                _ = token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(data) => data,
                    None => break,
                },
            };
            let sent = tokio::select! {
                _ = token.cancelled() => break,
                res = sink.send(Message::Binary(data)) => res,
            };
            if let Err(e) = sent {
                debug!(conn = %self.life.id(), error = %e, "write failed");
                break;
            }
        }
        self.close();
        let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
    }
}

#[async_trait]
impl<M: Send + 'static> Agent<M> for WsConn<M> {
    async fn write_msg(&self, msg: M) {
        if self.life.is_closed() {
            return;
        }
        let data = match self.parser.marshal_payload(self.router.as_ref(), &msg) {
            Ok(data) => data,
            Err(e) => {
                error!(conn = %self.life.id(), error = %e, "marshal message failed");
                return;
            }
        };
        tokio::select! {
            _ = self.life.token().cancelled() => {}
            _ = self.tx.send(data) => {}
        }
    }

    fn close(&self) {
        if !self.life.begin_close() {
            return;
        }
        debug!(conn = %self.life.id(), remote = %self.life.remote_addr(), "ws connection closed");
        if let (Some(dispatcher), Some(this)) = (&self.dispatcher, self.this.upgrade()) {
            dispatcher.go(AgentEvent::CloseAgent, this);
        }
    }

    fn is_closed(&self) -> bool {
        self.life.is_closed()
    }

    fn local_addr(&self) -> SocketAddr {
        self.life.local_addr()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.life.remote_addr()
    }

    fn user_data(&self) -> Option<UserData> {
        self.life.user_data().get()
    }

    fn set_user_data(&self, data: UserData) {
        self.life.user_data().set(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Admission;
    use crate::testkit::{self, EchoBytes};
    use tokio::io::DuplexStream;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::protocol::Role;

    const WAIT: Duration = Duration::from_secs(2);

    async fn pair(buffer: usize) -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server, client) = tokio::io::duplex(buffer);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn test_binary_message_is_echoed_without_length_header() {
        let (ctx, _notices) = testkit::context(EchoBytes);
        let admission = Admission::new(1);
        let (server, mut client) = pair(4096).await;
        let _conn = WsConn::spawn(
            server,
            testkit::local(),
            testkit::remote(),
            admission.try_acquire().unwrap(),
            &ctx,
            8,
        );

        client.send(Message::Binary(vec![0x00, 0x03, b'h', b'i'])).await.unwrap();
        let reply = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();

        assert_eq!(reply, Message::Binary(vec![0x00, 0x03, b'h', b'i']));
    }

    #[tokio::test]
    async fn test_payload_without_id_closes_connection() {
        let (ctx, mut notices) = testkit::context(EchoBytes);
        let admission = Admission::new(1);
        let (server, mut client) = pair(4096).await;
        let conn = WsConn::spawn(
            server,
            testkit::local(),
            testkit::remote(),
            admission.try_acquire().unwrap(),
            &ctx,
            8,
        );

        client.send(Message::Binary(vec![0x07])).await.unwrap();

        assert_eq!(notices.recv().await.unwrap().event, AgentEvent::NewAgent);
        let closed = timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert_eq!(closed.event, AgentEvent::CloseAgent);
        assert!(conn.is_closed());
        assert_eq!(admission.remaining(), 1);
    }

    #[tokio::test]
    async fn test_send_blocks_on_full_queue_until_close() {
        // Arrange: the peer never reads and the link buffer is tiny.
        let (ctx, _notices) = testkit::context(EchoBytes);
        let admission = Admission::new(1);
        let (server, _client) = pair(64).await;
        let conn = WsConn::spawn(
            server,
            testkit::local(),
            testkit::remote(),
            admission.try_acquire().unwrap(),
            &ctx,
            1,
        );
        let big = {
            let mut msg = vec![0x00, 0x01];
            msg.extend([0xEE; 512]);
            msg
        };
        conn.write_msg(big.clone()).await;
        conn.write_msg(big.clone()).await;

        // Act
        let blocked = timeout(Duration::from_millis(100), conn.write_msg(big.clone())).await;
        let pending = {
            let conn = Arc::clone(&conn);
            let big = big.clone();
            tokio::spawn(async move { conn.write_msg(big).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close();

        // Assert
        assert!(blocked.is_err(), "send must wait while the queue is full");
        assert!(timeout(WAIT, pending).await.is_ok(), "close releases a blocked send");
    }
}
