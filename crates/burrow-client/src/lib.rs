//! Burrow client - proxy lifecycle management
//!
//! Tracks one runtime instance per configured proxy, reconciles the live set
//! against new configuration snapshots, routes work connections dialed back
//! by the server and turns start/stop intents into control messages.

pub mod error;
pub mod event;
pub mod forwarder;
pub mod manager;
pub mod proxy;
pub mod sink;
pub mod status;
pub mod wrapper;

pub use error::{ProxyError, SinkError};
pub use event::{CloseProxyPayload, EventHandler, EventPayload, EventType, StartProxyPayload};
pub use forwarder::{ForwardError, TcpForwarder, WorkConnContext, WorkConnHandler};
pub use manager::{ProxyManager, ReloadSummary};
pub use proxy::{Proxy, ProxyFactory, WorkConn, WorkConnIo};
pub use sink::MessageSink;
pub use status::{ProxyPhase, ProxyStatus};
pub use wrapper::{ProxyWrapper, WrapperFactory};

pub use burrow_proto::{ClientCommonConfig, ControlMessage, ProxyConfig, ProxyType};
