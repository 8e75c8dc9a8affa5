//! State shared by every connection variant: identity, the one-time close
//! guard, the admission permit it gives back, and the user-data slot.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use gate_core::UserData;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::admission::AdmissionPermit;

/// Open/closed bookkeeping for one connection.
///
/// `begin_close` is the single gate every close trigger goes through: a read
/// failure, a write failure, a saturated queue, an explicit `close()` from
/// the application or server shutdown.  Exactly one caller wins.
#[derive(Debug)]
pub(crate) struct ConnLifecycle {
    id: Uuid,
    local: SocketAddr,
    remote: SocketAddr,
    closed: AtomicBool,
    token: CancellationToken,
    permit: Mutex<Option<AdmissionPermit>>,
    user_data: UserDataSlot,
}

impl ConnLifecycle {
    /// `token` should be a child of the server's shutdown token so that
    /// server shutdown reaches every worker loop of this connection.
    pub(crate) fn new(
        token: CancellationToken,
        permit: AdmissionPermit,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            local,
            remote,
            closed: AtomicBool::new(false),
            token,
            permit: Mutex::new(Some(permit)),
            user_data: UserDataSlot::default(),
        }
    }

    /// Marks the connection closed.  Returns `true` for the one caller that
    /// performed the transition; that caller must send the close notice.
    ///
    /// The winner stops every worker loop and returns the admission slot.
    pub(crate) fn begin_close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.token.cancel();
        drop(
            self.permit
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub(crate) fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub(crate) fn user_data(&self) -> &UserDataSlot {
        &self.user_data
    }
}

/// Single cell holding the application's opaque session state.
#[derive(Default)]
pub(crate) struct UserDataSlot {
    inner: RwLock<Option<UserData>>,
}

impl UserDataSlot {
    pub(crate) fn get(&self) -> Option<UserData> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, data: UserData) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(data);
    }
}

impl std::fmt::Debug for UserDataSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDataSlot")
            .field("set", &self.get().is_some())
            .finish()
    }
}
