//! Runtime instance contract

use crate::error::ProxyError;
use crate::event::EventHandler;
use crate::status::ProxyStatus;
use burrow_proto::{ClientCommonConfig, ProxyConfig, StartWorkConn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream of a work connection dialed back by the server
pub trait WorkConnIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> WorkConnIo for T {}

/// Owned work connection; dropping it closes the connection
pub type WorkConn = Box<dyn WorkConnIo>;

/// One proxy's runtime state machine, as seen by the [`ProxyManager`].
///
/// [`ProxyManager`]: crate::ProxyManager
#[cfg_attr(test, mockall::automock)]
pub trait Proxy: Send + Sync {
    /// Configuration this instance was built from
    fn config(&self) -> &ProxyConfig;

    /// Announce the proxy to the server
    fn start(&self);

    /// Tear the proxy down. Idempotent; teardown has begun when this returns.
    fn stop(&self);

    /// Apply the server's answer to the start announcement
    fn set_running_status(&self, remote_addr: &str, server_error: &str)
        -> Result<(), ProxyError>;

    /// Take ownership of a work connection for this proxy
    fn handle_work_conn(&self, conn: WorkConn, msg: StartWorkConn);

    fn status(&self) -> ProxyStatus;
}

/// Builds runtime instances for newly configured proxies
pub trait ProxyFactory: Send + Sync {
    fn build(
        &self,
        cfg: ProxyConfig,
        client_cfg: Arc<ClientCommonConfig>,
        events: EventHandler,
        server_udp_port: u16,
    ) -> Arc<dyn Proxy>;
}
