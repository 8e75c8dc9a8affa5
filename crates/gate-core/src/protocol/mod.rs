//! Wire framing and the router contract that gives frames a meaning.

pub mod codec;
pub mod router;

pub use codec::{ByteOrder, FieldWidth, FrameParser, ProtocolError};
pub use router::{RouteError, Router};
