use crate::proxy::WorkConn;
use async_trait::async_trait;
use burrow_proto::{ClientCommonConfig, ProxyConfig, ProxyType, StartWorkConn};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;

/// Errors that can occur while serving a work connection
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Failed to connect to local service {address}: {source}")]
    ConnectionFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("IO error during forwarding: {0}")]
    Io(#[from] std::io::Error),

    #[error("Proxy type {0} cannot be forwarded over a work connection")]
    Unsupported(&'static str),
}

/// Everything a handler needs to know about the proxy a connection belongs to
#[derive(Debug, Clone)]
pub struct WorkConnContext {
    pub proxy: Arc<ProxyConfig>,
    pub client: Arc<ClientCommonConfig>,
    /// UDP port the server listens on, as announced at login
    pub server_udp_port: u16,
}

/// Serves the application traffic of one work connection
#[async_trait]
pub trait WorkConnHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: WorkConnContext,
        conn: WorkConn,
        msg: StartWorkConn,
    ) -> Result<(), ForwardError>;
}

/// Pumps work connections to the proxy's local TCP service
#[derive(Debug, Default)]
pub struct TcpForwarder {}

impl TcpForwarder {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl WorkConnHandler for TcpForwarder {
    async fn handle(
        &self,
        ctx: WorkConnContext,
        mut conn: WorkConn,
        msg: StartWorkConn,
    ) -> Result<(), ForwardError> {
        if let ProxyType::Udp { .. } = ctx.proxy.kind {
            return Err(ForwardError::Unsupported(ctx.proxy.kind.as_str()));
        }

        let address = ctx.proxy.local_addr();
        let mut local = TcpStream::connect(&address).await.map_err(|source| {
            ForwardError::ConnectionFailed {
                address: address.clone(),
                source,
            }
        })?;

        tracing::debug!(
            proxy_name = %ctx.proxy.name,
            src_addr = %msg.src_addr,
            src_port = msg.src_port,
            local_addr = %address,
            "Connected to local service"
        );

        let (to_local, to_remote) = tokio::io::copy_bidirectional(&mut conn, &mut local).await?;

        tracing::debug!(
            proxy_name = %ctx.proxy.name,
            bytes_to_local = to_local,
            bytes_to_remote = to_remote,
            "Work connection finished"
        );

        Ok(())
    }
}
