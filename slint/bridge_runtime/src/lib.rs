//! Call bridge between application logic and a native UI runtime.
//!
//! Application code reaches native code through [`Driver::invoke`] and friends;
//! native code reaches application objects through [`Driver::handle_inbound`],
//! addressing them by the string ids handed out by the [`ElementRegistry`]. Work
//! that must touch the UI goes through a bounded queue drained only on the UI
//! thread, and every result travelling back is matched to its caller by a
//! correlation id.

pub mod codec;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod framing;
pub mod inbound;
pub mod outbound;
pub mod registry;
pub mod transport;

pub use crate::codec::Call;
pub use crate::config::BridgeConfig;
pub use crate::correlator::{Outcome, ReturnCorrelator};
pub use crate::dispatch::{UiExecutor, UiPump, UiQueue, UiTask};
pub use crate::driver::{Driver, PumpHost};
pub use crate::error::{BridgeError, HandlerError};
pub use crate::framing::FrameTransport;
pub use crate::inbound::{CallKind, InboundRouter, RELEASE_METHOD, RETURN_SELECTOR};
pub use crate::outbound::{CallHandle, OutboundRouter};
pub use crate::registry::{Element, ElementRegistry};
pub use crate::transport::{ChannelTransport, NativeTransport};
pub use serde_json;
