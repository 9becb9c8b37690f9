//! Control message types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Control-plane message carried on the single multiplexed server connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ControlMessage {
    /// Client asks the server to open the public side of a proxy
    NewProxy(NewProxy),
    /// Server answers a `NewProxy`, with either a remote address or an error
    NewProxyResp(NewProxyResp),
    /// Client tells the server to release a proxy
    CloseProxy(CloseProxy),
    /// Server announces a work connection it dialed back for a proxy
    StartWorkConn(StartWorkConn),
}

impl ControlMessage {
    /// Name of the proxy this message refers to
    pub fn proxy_name(&self) -> &str {
        match self {
            ControlMessage::NewProxy(m) => &m.proxy_name,
            ControlMessage::NewProxyResp(m) => &m.proxy_name,
            ControlMessage::CloseProxy(m) => &m.proxy_name,
            ControlMessage::StartWorkConn(m) => &m.proxy_name,
        }
    }
}

/// Registration of a proxy with the server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewProxy {
    pub proxy_name: String,
    /// "tcp", "udp", "http" or "https"
    pub proxy_type: String,
    pub use_encryption: bool,
    pub use_compression: bool,
    pub bandwidth_limit: Option<String>,
    pub group: Option<String>,
    pub group_key: Option<String>,
    pub metas: BTreeMap<String, String>,

    // tcp / udp
    pub remote_port: Option<u16>,

    // http / https
    pub custom_domains: Vec<String>,
    pub subdomain: Option<String>,
    pub locations: Vec<String>,
}

/// Server response to a `NewProxy`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewProxyResp {
    pub proxy_name: String,
    pub remote_addr: String,
    /// Empty on success
    pub error: String,
}

/// Release of a proxy on the server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloseProxy {
    pub proxy_name: String,
}

/// Announcement accompanying a work connection dialed back by the server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StartWorkConn {
    pub proxy_name: String,
    pub src_addr: String,
    pub dst_addr: String,
    pub src_port: u16,
    pub dst_port: u16,
    /// Set by the server when it could not hand the connection over
    pub error: String,
}
