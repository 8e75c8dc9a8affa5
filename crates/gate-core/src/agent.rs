//! Connection handle contract exposed to routers and dispatch consumers.
//!
//! Every transport wraps its live links in a type implementing [`Agent`].
//! Application code only ever sees `Arc<dyn Agent<M>>`, so it can send,
//! close, inspect addresses and attach session state without knowing which
//! transport the client used.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

/// Opaque per-connection session state.
///
/// The core stores and returns it but never inspects it.  Use
/// [`downcast_user_data`] to recover the concrete type.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Shared handle to a live connection.
pub type AgentRef<M> = Arc<dyn Agent<M>>;

/// One client connection, regardless of transport.
#[async_trait]
pub trait Agent<M: Send + 'static>: Send + Sync {
    /// Queues `msg` for delivery.
    ///
    /// A silent no-op once the connection is closed.  When the outbound queue
    /// is saturated the behaviour depends on the transport:
    ///
    /// | Transport | Saturated queue                                      |
    /// |-----------|------------------------------------------------------|
    /// | TCP       | drop the message and close the connection             |
    /// | KCP       | wait up to the send timeout, then drop; stays open    |
    /// | WebSocket | wait until space frees up or the connection closes    |
    async fn write_msg(&self, msg: M);

    /// Closes the connection.  Safe to call any number of times from any task.
    fn close(&self);

    /// `true` once [`Agent::close`] has run (from any trigger).
    fn is_closed(&self) -> bool;

    fn local_addr(&self) -> SocketAddr;

    fn remote_addr(&self) -> SocketAddr;

    /// Returns the session state last stored with [`Agent::set_user_data`].
    fn user_data(&self) -> Option<UserData>;

    /// Replaces the session state.
    fn set_user_data(&self, data: UserData);
}

/// Recovers the concrete type behind a [`UserData`] value.
///
/// Returns `None` if the stored value is of a different type.
pub fn downcast_user_data<T>(data: UserData) -> Option<Arc<T>>
where
    T: Any + Send + Sync,
{
    data.downcast::<T>().ok()
}
