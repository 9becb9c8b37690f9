//! Default runtime instance
//!
//! `ProxyWrapper` tracks a proxy's phase, emits its start and close intents
//! and hands work connections to a [`WorkConnHandler`] once the server has
//! accepted the proxy. A proxy rejected by the server is announced again
//! after `start_retry_interval_secs`.

use crate::error::{ProxyError, SinkError};
use crate::event::{EventHandler, EventPayload, EventType};
use crate::forwarder::{TcpForwarder, WorkConnContext, WorkConnHandler};
use crate::proxy::{Proxy, ProxyFactory, WorkConn};
use crate::status::{ProxyPhase, ProxyStatus};
use burrow_proto::{ClientCommonConfig, ProxyConfig, StartWorkConn};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CLOSE_RETRY_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug)]
struct WrapperState {
    phase: ProxyPhase,
    remote_addr: Option<String>,
    error: Option<String>,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl WrapperState {
    fn record_failure(&mut self, error: String) {
        self.phase = ProxyPhase::Failed;
        self.error = Some(error);
        self.last_failure = Some(Instant::now());
        self.last_failure_at = Some(Utc::now());
    }
}

/// Runtime instance for one configured proxy
pub struct ProxyWrapper {
    ctx: WorkConnContext,
    events: EventHandler,
    handler: Arc<dyn WorkConnHandler>,
    state: Arc<Mutex<WrapperState>>,
    cancel: CancellationToken,
    retry_interval: Duration,
}

impl ProxyWrapper {
    pub fn new(
        cfg: ProxyConfig,
        client_cfg: Arc<ClientCommonConfig>,
        events: EventHandler,
        server_udp_port: u16,
        handler: Arc<dyn WorkConnHandler>,
    ) -> Self {
        let retry_interval = Duration::from_secs(client_cfg.start_retry_interval_secs);
        Self {
            ctx: WorkConnContext {
                proxy: Arc::new(cfg),
                client: client_cfg,
                server_udp_port,
            },
            events,
            handler,
            state: Arc::new(Mutex::new(WrapperState {
                phase: ProxyPhase::Created,
                remote_addr: None,
                error: None,
                last_failure: None,
                last_failure_at: None,
            })),
            cancel: CancellationToken::new(),
            retry_interval,
        }
    }

    fn name(&self) -> &str {
        &self.ctx.proxy.name
    }

    fn state(&self) -> MutexGuard<'_, WrapperState> {
        lock(&self.state)
    }

    fn start_payload(&self) -> EventPayload {
        EventPayload::start(self.ctx.proxy.to_new_proxy())
    }

    /// Periodically re-announce the proxy while it sits in `Failed`
    fn spawn_check_worker(&self, rt: &Handle) {
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        let payload = self.start_payload();
        let interval = self.retry_interval;
        let name = self.name().to_string();

        rt.spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        retry_start(&state, &cancel, &events, &payload, interval, &name);
                    }
                }
            }
            debug!(proxy_name = %name, "Check worker exited");
        });
    }

    /// Keep offering a close intent the queue had no room for
    fn spawn_close_retry(&self, rt: &Handle) {
        let events = self.events.clone();
        let name = self.name().to_string();

        rt.spawn(async move {
            let mut ticker = tokio::time::interval(CLOSE_RETRY_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match events(EventType::CloseProxy, EventPayload::close(name.as_str())) {
                    Ok(()) => {
                        debug!(proxy_name = %name, "Close intent sent after retry");
                        break;
                    }
                    Err(ProxyError::SinkFault(SinkError::Full)) => continue,
                    Err(e) => {
                        warn!(proxy_name = %name, "Giving up on close intent: {}", e);
                        break;
                    }
                }
            }
        });
    }
}

/// Re-announce a failed proxy once its retry interval has passed.
///
/// The intent is emitted under the state lock so a concurrent `stop()` either
/// runs first and prevents it, or runs after the intent is queued.
fn retry_start(
    state: &Mutex<WrapperState>,
    cancel: &CancellationToken,
    events: &EventHandler,
    payload: &EventPayload,
    interval: Duration,
    name: &str,
) {
    let mut st = lock(state);
    let due = st.phase == ProxyPhase::Failed
        && !cancel.is_cancelled()
        && st.last_failure.is_some_and(|t| t.elapsed() >= interval);
    if !due {
        return;
    }

    info!(proxy_name = %name, "Announcing proxy again after start failure");
    st.phase = ProxyPhase::Started;
    if let Err(e) = events(EventType::StartProxy, payload.clone()) {
        warn!(proxy_name = %name, "Failed to send start intent: {}", e);
        st.record_failure(format!("failed to send start intent: {}", e));
    }
}

fn lock(state: &Mutex<WrapperState>) -> MutexGuard<'_, WrapperState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Proxy for ProxyWrapper {
    fn config(&self) -> &ProxyConfig {
        &self.ctx.proxy
    }

    fn start(&self) {
        {
            let mut st = self.state();
            if st.phase != ProxyPhase::Created {
                debug!(proxy_name = %self.name(), phase = %st.phase, "Ignoring start");
                return;
            }
            st.phase = ProxyPhase::Started;

            if let Err(e) = (self.events)(EventType::StartProxy, self.start_payload()) {
                warn!(proxy_name = %self.name(), "Failed to send start intent: {}", e);
                st.record_failure(format!("failed to send start intent: {}", e));
            }
        }

        match Handle::try_current() {
            Ok(rt) => self.spawn_check_worker(&rt),
            Err(_) => debug!(
                proxy_name = %self.name(),
                "No async runtime, start failures will not be retried"
            ),
        }
    }

    fn stop(&self) {
        let mut st = self.state();
        let previous = st.phase;
        if previous == ProxyPhase::Stopped {
            return;
        }
        st.phase = ProxyPhase::Stopped;
        self.cancel.cancel();

        // Never announced, nothing to tear down on the server
        if previous == ProxyPhase::Created {
            return;
        }

        match (self.events)(EventType::CloseProxy, EventPayload::close(self.name())) {
            Ok(()) => {}
            Err(ProxyError::SinkFault(SinkError::Full)) => match Handle::try_current() {
                Ok(rt) => {
                    debug!(proxy_name = %self.name(), "Queue full, retrying close intent");
                    self.spawn_close_retry(&rt);
                }
                Err(_) => warn!(proxy_name = %self.name(), "Queue full, close intent lost"),
            },
            Err(e) => warn!(proxy_name = %self.name(), "Failed to send close intent: {}", e),
        }
    }

    fn set_running_status(
        &self,
        remote_addr: &str,
        server_error: &str,
    ) -> Result<(), ProxyError> {
        let mut st = self.state();
        if st.phase != ProxyPhase::Started {
            return Err(ProxyError::InvalidPhase {
                name: self.name().to_string(),
                phase: st.phase,
            });
        }

        if !remote_addr.is_empty() {
            st.remote_addr = Some(remote_addr.to_string());
        }

        if !server_error.is_empty() {
            st.record_failure(server_error.to_string());
            return Err(ProxyError::ServerRejected(server_error.to_string()));
        }

        st.phase = ProxyPhase::Running;
        st.error = None;
        Ok(())
    }

    fn handle_work_conn(&self, conn: WorkConn, msg: StartWorkConn) {
        let phase = self.state().phase;
        if phase != ProxyPhase::Running {
            debug!(proxy_name = %self.name(), %phase, "Dropping work connection");
            return;
        }

        if !msg.error.is_empty() {
            warn!(proxy_name = %self.name(), "Server failed work connection: {}", msg.error);
            return;
        }

        let rt = match Handle::try_current() {
            Ok(rt) => rt,
            Err(_) => {
                warn!(proxy_name = %self.name(), "No async runtime, dropping work connection");
                return;
            }
        };

        let handler = self.handler.clone();
        let ctx = self.ctx.clone();
        let cancel = self.cancel.clone();

        rt.spawn(async move {
            let name = ctx.proxy.name.clone();
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(proxy_name = %name, "Work connection cancelled");
                }
                result = handler.handle(ctx, conn, msg) => {
                    if let Err(e) = result {
                        warn!(proxy_name = %name, "Work connection failed: {}", e);
                    }
                }
            }
        });
    }

    fn status(&self) -> ProxyStatus {
        let st = self.state();
        ProxyStatus {
            name: self.name().to_string(),
            proxy_type: self.ctx.proxy.kind.as_str().to_string(),
            phase: st.phase,
            remote_addr: st.remote_addr.clone(),
            error: st.error.clone(),
            local_addr: self.ctx.proxy.local_addr(),
            last_failure_at: st.last_failure_at,
        }
    }
}

impl Drop for ProxyWrapper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Builds [`ProxyWrapper`]s sharing one work connection handler
#[derive(Clone)]
pub struct WrapperFactory {
    handler: Arc<dyn WorkConnHandler>,
}

impl WrapperFactory {
    pub fn new(handler: Arc<dyn WorkConnHandler>) -> Self {
        Self { handler }
    }
}

impl Default for WrapperFactory {
    fn default() -> Self {
        Self::new(Arc::new(TcpForwarder::new()))
    }
}

impl ProxyFactory for WrapperFactory {
    fn build(
        &self,
        cfg: ProxyConfig,
        client_cfg: Arc<ClientCommonConfig>,
        events: EventHandler,
        server_udp_port: u16,
    ) -> Arc<dyn Proxy> {
        Arc::new(ProxyWrapper::new(
            cfg,
            client_cfg,
            events,
            server_udp_port,
            self.handler.clone(),
        ))
    }
}
