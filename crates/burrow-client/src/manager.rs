//! Proxy manager
//!
//! Owns the name → runtime instance registry. A configuration snapshot is
//! applied with [`ProxyManager::reload`], which stops every removed or changed
//! proxy before it starts any new one, all under a single write lock so other
//! callers only ever observe the set before or after the reload.

use crate::error::ProxyError;
use crate::event::{EventHandler, EventPayload, EventType};
use crate::proxy::{Proxy, ProxyFactory, WorkConn};
use crate::sink::MessageSink;
use crate::status::ProxyStatus;
use crate::wrapper::WrapperFactory;
use burrow_proto::{ClientCommonConfig, ProxyConfig, StartWorkConn};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Names removed and added by one reload, sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

impl ReloadSummary {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

#[derive(Default)]
struct Registry {
    proxies: HashMap<String, Arc<dyn Proxy>>,
    closed: bool,
}

/// Registry and lifecycle controller for every configured proxy
pub struct ProxyManager {
    sink: MessageSink,
    registry: RwLock<Registry>,
    client_cfg: Arc<ClientCommonConfig>,
    /// UDP port the server listens on; handed to new proxies untouched
    server_udp_port: u16,
    factory: Arc<dyn ProxyFactory>,
}

impl ProxyManager {
    /// Create a manager building [`ProxyWrapper`](crate::ProxyWrapper)s
    pub fn new(
        sink: MessageSink,
        client_cfg: Arc<ClientCommonConfig>,
        server_udp_port: u16,
    ) -> Self {
        Self::with_factory(
            sink,
            client_cfg,
            server_udp_port,
            Arc::new(WrapperFactory::default()),
        )
    }

    pub fn with_factory(
        sink: MessageSink,
        client_cfg: Arc<ClientCommonConfig>,
        server_udp_port: u16,
        factory: Arc<dyn ProxyFactory>,
    ) -> Self {
        Self {
            sink,
            registry: RwLock::new(Registry::default()),
            client_cfg,
            server_udp_port,
            factory,
        }
    }

    // A panicking proxy callback cannot leave the map half-written, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Proxy>> {
        self.read().proxies.get(name).cloned()
    }

    /// Apply the server's answer to a proxy's start announcement
    pub fn start_proxy(
        &self,
        name: &str,
        remote_addr: &str,
        server_error: &str,
    ) -> Result<(), ProxyError> {
        let proxy = self
            .get(name)
            .ok_or_else(|| ProxyError::NotFound(name.to_string()))?;
        proxy.set_running_status(remote_addr, server_error)
    }

    /// Route a work connection to the proxy registered under `name`.
    ///
    /// The proxy may have been removed since the server dialed back; the
    /// connection is then closed.
    pub fn handle_work_conn(&self, name: &str, conn: WorkConn, msg: StartWorkConn) {
        match self.get(name) {
            Some(proxy) => proxy.handle_work_conn(conn, msg),
            None => {
                debug!(proxy_name = %name, "No proxy for work connection, closing it");
                drop(conn);
            }
        }
    }

    /// Translate a proxy intent into a control message and enqueue it
    pub fn handle_event(
        &self,
        event_type: EventType,
        payload: EventPayload,
    ) -> Result<(), ProxyError> {
        forward_event(&self.sink, event_type, payload)
    }

    /// Snapshot of every registered proxy, in no particular order
    pub fn status(&self) -> Vec<ProxyStatus> {
        self.read().proxies.values().map(|p| p.status()).collect()
    }

    /// Number of registered proxies
    pub fn count(&self) -> usize {
        self.read().proxies.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().proxies.contains_key(name)
    }

    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    /// Reconcile the running proxies with `desired`.
    ///
    /// Proxies missing from `desired` or whose configuration changed are
    /// stopped and removed first; proxies not yet registered are then built and
    /// started. Unchanged proxies are left alone.
    pub fn reload(
        &self,
        desired: HashMap<String, ProxyConfig>,
    ) -> Result<ReloadSummary, ProxyError> {
        let mut registry = self.write();
        if registry.closed {
            return Err(ProxyError::Closed);
        }

        let mut removed: Vec<String> = registry
            .proxies
            .iter()
            .filter(|(name, proxy)| match desired.get(*name) {
                Some(cfg) => !proxy.config().compare(cfg),
                None => true,
            })
            .map(|(name, _)| name.clone())
            .collect();
        removed.sort();

        for name in &removed {
            if let Some(proxy) = registry.proxies.remove(name) {
                proxy.stop();
            }
        }
        if !removed.is_empty() {
            info!(removed = ?removed, "Proxies removed");
        }

        let mut added = Vec::new();
        for (name, cfg) in desired {
            if registry.proxies.contains_key(&name) {
                continue;
            }

            let proxy = self.factory.build(
                cfg,
                self.client_cfg.clone(),
                self.event_handler(),
                self.server_udp_port,
            );
            registry.proxies.insert(name.clone(), proxy.clone());
            proxy.start();
            added.push(name);
        }
        added.sort();
        if !added.is_empty() {
            info!(added = ?added, "Proxies added");
        }

        Ok(ReloadSummary { removed, added })
    }

    /// Stop every proxy and empty the registry.
    ///
    /// Later reloads fail with [`ProxyError::Closed`].
    pub fn close(&self) {
        let mut registry = self.write();
        registry.closed = true;
        for (name, proxy) in registry.proxies.drain() {
            debug!(proxy_name = %name, "Stopping proxy");
            proxy.stop();
        }
    }

    /// Event callback handed to new proxies. It only touches the sink, so a
    /// proxy may emit while this manager holds its write lock.
    fn event_handler(&self) -> EventHandler {
        let sink = self.sink.clone();
        Arc::new(move |event_type, payload| forward_event(&sink, event_type, payload))
    }
}

fn forward_event(
    sink: &MessageSink,
    event_type: EventType,
    payload: EventPayload,
) -> Result<(), ProxyError> {
    if payload.event_type() != event_type {
        return Err(ProxyError::InvalidPayloadType { event_type });
    }
    sink.send(payload.into_message())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::proxy::MockProxy;
    use crate::status::ProxyPhase;
    use burrow_proto::{ControlMessage, NewProxy};
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    /// Hands out pre-built mocks in order
    struct QueuedFactory {
        mocks: Mutex<Vec<MockProxy>>,
    }

    impl QueuedFactory {
        fn new(mut mocks: Vec<MockProxy>) -> Arc<Self> {
            mocks.reverse();
            Arc::new(Self {
                mocks: Mutex::new(mocks),
            })
        }
    }

    impl ProxyFactory for QueuedFactory {
        fn build(
            &self,
            _cfg: ProxyConfig,
            _client_cfg: Arc<ClientCommonConfig>,
            _events: EventHandler,
            _server_udp_port: u16,
        ) -> Arc<dyn Proxy> {
            Arc::new(self.mocks.lock().unwrap().pop().expect("no mock left"))
        }
    }

    fn started_mock(cfg: ProxyConfig) -> MockProxy {
        let mut mock = MockProxy::new();
        mock.expect_config().return_const(cfg);
        mock.expect_start().times(1).return_const(());
        mock
    }

    fn manager(factory: Arc<dyn ProxyFactory>) -> ProxyManager {
        let (sink, _rx) = MessageSink::channel(16);
        ProxyManager::with_factory(sink, Arc::new(ClientCommonConfig::default()), 0, factory)
    }

    fn desired(cfgs: &[ProxyConfig]) -> HashMap<String, ProxyConfig> {
        cfgs.iter().map(|c| (c.name.clone(), c.clone())).collect()
    }

    #[test]
    fn test_start_proxy_not_found() {
        let mgr = manager(QueuedFactory::new(vec![]));
        let err = mgr.start_proxy("missing", "", "").unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(ref n) if n == "missing"));
        assert_eq!(mgr.count(), 0);
    }

    #[test]
    fn test_start_proxy_forwards_status() {
        let cfg = ProxyConfig::tcp("ssh", 22, 6000);
        let mut mock = started_mock(cfg.clone());
        mock.expect_set_running_status()
            .withf(|addr, err| addr.to_string() == ":6000" && err.is_empty())
            .times(1)
            .returning(|_, _| Ok(()));

        let mgr = manager(QueuedFactory::new(vec![mock]));
        mgr.reload(desired(&[cfg])).unwrap();

        assert!(mgr.start_proxy("ssh", ":6000", "").is_ok());
    }

    #[test]
    fn test_start_proxy_returns_instance_error() {
        let cfg = ProxyConfig::tcp("ssh", 22, 6000);
        let mut mock = started_mock(cfg.clone());
        mock.expect_set_running_status()
            .returning(|_, err| Err(ProxyError::ServerRejected(err.to_string())));

        let mgr = manager(QueuedFactory::new(vec![mock]));
        mgr.reload(desired(&[cfg])).unwrap();

        let err = mgr.start_proxy("ssh", "", "port already used").unwrap_err();
        assert!(matches!(err, ProxyError::ServerRejected(ref e) if e == "port already used"));
    }

    #[test]
    fn test_reload_changed_config_replaces_instance() {
        let old_cfg = ProxyConfig::tcp("ssh", 22, 6000);
        let new_cfg = ProxyConfig::tcp("ssh", 22, 6001);

        let order = Arc::new(Mutex::new(Vec::new()));

        let mut old = MockProxy::new();
        old.expect_config().return_const(old_cfg.clone());
        let o = order.clone();
        old.expect_start()
            .times(1)
            .returning(move || o.lock().unwrap().push("start-old"));
        let o = order.clone();
        old.expect_stop()
            .times(1)
            .returning(move || o.lock().unwrap().push("stop-old"));

        let mut new = MockProxy::new();
        new.expect_config().return_const(new_cfg.clone());
        let o = order.clone();
        new.expect_start()
            .times(1)
            .returning(move || o.lock().unwrap().push("start-new"));

        let mgr = manager(QueuedFactory::new(vec![old, new]));
        mgr.reload(desired(&[old_cfg])).unwrap();
        let summary = mgr.reload(desired(&[new_cfg])).unwrap();

        assert_eq!(summary.removed, vec!["ssh"]);
        assert_eq!(summary.added, vec!["ssh"]);
        assert_eq!(mgr.count(), 1);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["start-old", "stop-old", "start-new"]
        );
    }

    #[test]
    fn test_close_stops_each_once() {
        let a = ProxyConfig::tcp("a", 22, 6000);
        let b = ProxyConfig::tcp("b", 23, 6001);

        let mut mock_a = started_mock(a.clone());
        mock_a.expect_stop().times(1).return_const(());
        let mut mock_b = started_mock(b.clone());
        mock_b.expect_stop().times(1).return_const(());

        let mgr = manager(QueuedFactory::new(vec![mock_a, mock_b]));
        mgr.reload(desired(&[a, b])).unwrap();

        mgr.close();
        assert!(mgr.status().is_empty());
        assert!(mgr.is_closed());

        // A second close has nothing left to stop
        mgr.close();
    }

    #[test]
    fn test_reload_after_close_fails() {
        let mgr = manager(QueuedFactory::new(vec![]));
        mgr.close();

        let err = mgr
            .reload(desired(&[ProxyConfig::tcp("ssh", 22, 6000)]))
            .unwrap_err();
        assert!(matches!(err, ProxyError::Closed));
        assert_eq!(mgr.count(), 0);
    }

    #[test]
    fn test_status_snapshots() {
        let cfg = ProxyConfig::tcp("ssh", 22, 6000);
        let mut mock = started_mock(cfg.clone());
        mock.expect_status().returning(|| ProxyStatus {
            name: "ssh".to_string(),
            proxy_type: "tcp".to_string(),
            phase: ProxyPhase::Running,
            remote_addr: Some(":6000".to_string()),
            error: None,
            local_addr: "127.0.0.1:22".to_string(),
            last_failure_at: None,
        });

        let mgr = manager(QueuedFactory::new(vec![mock]));
        mgr.reload(desired(&[cfg])).unwrap();

        let statuses = mgr.status();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].phase, ProxyPhase::Running);
        assert_eq!(statuses[0].remote_addr_or_error(), Some(":6000"));
    }

    #[tokio::test]
    async fn test_work_conn_routed_to_instance() {
        let cfg = ProxyConfig::tcp("ssh", 22, 6000);
        let mut mock = started_mock(cfg.clone());
        mock.expect_handle_work_conn()
            .withf(|_, msg| msg.proxy_name == "ssh")
            .times(1)
            .return_const(());

        let mgr = manager(QueuedFactory::new(vec![mock]));
        mgr.reload(desired(&[cfg])).unwrap();

        let (_client, server) = tokio::io::duplex(16);
        let msg = StartWorkConn {
            proxy_name: "ssh".to_string(),
            ..Default::default()
        };
        mgr.handle_work_conn("ssh", Box::new(server), msg);
    }

    #[tokio::test]
    async fn test_work_conn_for_unknown_proxy_is_closed() {
        let mgr = manager(QueuedFactory::new(vec![]));

        let (mut client, server) = tokio::io::duplex(16);
        mgr.handle_work_conn("ghost", Box::new(server), StartWorkConn::default());

        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);
        assert_eq!(mgr.count(), 0);
    }

    #[test]
    fn test_handle_event_enqueues_message() {
        let (sink, mut rx) = MessageSink::channel(4);
        let mgr = ProxyManager::new(sink, Arc::new(ClientCommonConfig::default()), 0);

        let payload = EventPayload::start(NewProxy {
            proxy_name: "web".to_string(),
            ..Default::default()
        });
        mgr.handle_event(EventType::StartProxy, payload).unwrap();
        mgr.handle_event(EventType::CloseProxy, EventPayload::close("web"))
            .unwrap();

        assert!(matches!(rx.try_recv().unwrap(), ControlMessage::NewProxy(_)));
        assert!(matches!(rx.try_recv().unwrap(), ControlMessage::CloseProxy(_)));
    }

    #[test]
    fn test_handle_event_mismatched_payload() {
        let (sink, mut rx) = MessageSink::channel(4);
        let mgr = ProxyManager::new(sink, Arc::new(ClientCommonConfig::default()), 0);

        let err = mgr
            .handle_event(EventType::StartProxy, EventPayload::close("web"))
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::InvalidPayloadType {
                event_type: EventType::StartProxy
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_event_sink_gone() {
        let (sink, rx) = MessageSink::channel(4);
        drop(rx);
        let mgr = ProxyManager::new(sink, Arc::new(ClientCommonConfig::default()), 0);

        let err = mgr
            .handle_event(EventType::CloseProxy, EventPayload::close("web"))
            .unwrap_err();
        assert!(matches!(err, ProxyError::SinkFault(SinkError::Closed)));

        // Still usable afterwards
        let err = mgr
            .handle_event(EventType::CloseProxy, EventPayload::close("ssh"))
            .unwrap_err();
        assert!(matches!(err, ProxyError::SinkFault(SinkError::Closed)));
    }
}
