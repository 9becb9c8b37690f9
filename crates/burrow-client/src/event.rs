//! Control-plane intents emitted by proxies

use crate::error::ProxyError;
use burrow_proto::{CloseProxy, ControlMessage, NewProxy};
use std::fmt;
use std::sync::Arc;

/// Kind of intent a proxy emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    StartProxy,
    CloseProxy,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::StartProxy => f.write_str("start-proxy"),
            EventType::CloseProxy => f.write_str("close-proxy"),
        }
    }
}

/// Proxy wants the server to open its public side
#[derive(Debug, Clone, PartialEq)]
pub struct StartProxyPayload {
    pub new_proxy_msg: NewProxy,
}

/// Proxy wants the server to release its public side
#[derive(Debug, Clone, PartialEq)]
pub struct CloseProxyPayload {
    pub close_proxy_msg: CloseProxy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    StartProxy(StartProxyPayload),
    CloseProxy(CloseProxyPayload),
}

impl EventPayload {
    pub fn start(new_proxy_msg: NewProxy) -> Self {
        EventPayload::StartProxy(StartProxyPayload { new_proxy_msg })
    }

    pub fn close(proxy_name: impl Into<String>) -> Self {
        EventPayload::CloseProxy(CloseProxyPayload {
            close_proxy_msg: CloseProxy {
                proxy_name: proxy_name.into(),
            },
        })
    }

    /// The event type this payload belongs to
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::StartProxy(_) => EventType::StartProxy,
            EventPayload::CloseProxy(_) => EventType::CloseProxy,
        }
    }

    /// Extract the control message carried by this payload
    pub fn into_message(self) -> ControlMessage {
        match self {
            EventPayload::StartProxy(p) => ControlMessage::NewProxy(p.new_proxy_msg),
            EventPayload::CloseProxy(p) => ControlMessage::CloseProxy(p.close_proxy_msg),
        }
    }
}

/// Callback a proxy uses to emit its intents
pub type EventHandler =
    Arc<dyn Fn(EventType, EventPayload) -> Result<(), ProxyError> + Send + Sync>;
