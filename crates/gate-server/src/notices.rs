//! Consumer for connection lifecycle notices.

use gate_core::{AgentEvent, AgentNotice};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use crate::echo::{session_stats, EchoMessage};

/// Running tally kept by [`consume`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub opened: u64,
    pub closed: u64,
}

impl Tally {
    pub fn online(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }
}

/// Logs every notice until all dispatchers are dropped, then returns the
/// final tally.
pub async fn consume(mut notices: UnboundedReceiver<AgentNotice<EchoMessage>>) -> Tally {
    let mut tally = Tally::default();
    while let Some(notice) = notices.recv().await {
        let remote = notice.agent.remote_addr();
        match notice.event {
            AgentEvent::NewAgent => {
                tally.opened += 1;
                info!(%remote, online = tally.online(), "client connected");
            }
            AgentEvent::CloseAgent => {
                tally.closed += 1;
                let messages = session_stats(&notice.agent).map_or(0, |s| s.received());
                info!(%remote, messages, online = tally.online(), "client disconnected");
            }
        }
    }
    tally
}
