//! Lifecycle controller
//!
//! Drives the bot through `Init -> LoggingIn -> Connected -> ShuttingDown ->
//! Terminated`. Message dispatch and gateway error handling run as
//! background tasks started before login, so the inbound callback is
//! registered before the first message can arrive.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BotConfig;
use crate::error::{Error, GatewayError, Result};
use crate::filter::{MessageFilter, Verdict};
use crate::gateway::{Gateway, GatewayEvents, MessageSource, SessionToken};
use crate::pairing::spawn_pairing_task;
use crate::responder::Responder;
use crate::store::SessionStore;

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    LoggingIn,
    Connected,
    ShuttingDown,
    Terminated,
}

impl LifecycleState {
    /// The only state reachable from `self`
    fn next(self) -> Option<LifecycleState> {
        match self {
            LifecycleState::Init => Some(LifecycleState::LoggingIn),
            LifecycleState::LoggingIn => Some(LifecycleState::Connected),
            LifecycleState::Connected => Some(LifecycleState::ShuttingDown),
            LifecycleState::ShuttingDown => Some(LifecycleState::Terminated),
            LifecycleState::Terminated => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Init => "init",
            LifecycleState::LoggingIn => "logging-in",
            LifecycleState::Connected => "connected",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Lifecycle controller over a gateway
pub struct Lifecycle<G: Gateway + 'static> {
    gateway: Arc<G>,
    events: Option<GatewayEvents>,
    config: BotConfig,
    sessions: SessionStore,
    start_time: DateTime<Utc>,
    state: LifecycleState,
}

impl<G: Gateway + 'static> Lifecycle<G> {
    /// Create a controller
    ///
    /// `start_time` is the process start; older messages are never answered.
    pub fn new(
        gateway: Arc<G>,
        events: GatewayEvents,
        config: BotConfig,
        start_time: DateTime<Utc>,
    ) -> Self {
        let sessions = SessionStore::new(config.storage.session_path());
        Self {
            gateway,
            events: Some(events),
            config,
            sessions,
            start_time,
            state: LifecycleState::Init,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition(&mut self, to: LifecycleState) -> Result<()> {
        if self.state.next() != Some(to) {
            return Err(Error::Lifecycle(format!(
                "illegal transition {} -> {}",
                self.state, to
            )));
        }
        info!("Lifecycle: {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Run until `shutdown` resolves or a fatal error occurs
    ///
    /// Every returned error is fatal for the process.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.state != LifecycleState::Init {
            return Err(Error::Lifecycle(format!("cannot run from state {}", self.state)));
        }
        let events = self
            .events
            .take()
            .ok_or_else(|| Error::Lifecycle("gateway events already consumed".to_string()))?;

        self.gateway
            .set_client_identity(&self.config.connection.client_identity())
            .inspect_err(|e| error!("error setting client name: {}", e))?;

        let responder = Responder::from_config(Arc::clone(&self.gateway), &self.config).await;
        let filter = MessageFilter::new(self.start_time, &self.config.filter);
        let (stop_dispatch, stop_rx) = oneshot::channel();
        let dispatcher = spawn_dispatcher(events.messages, filter, responder, stop_rx);

        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        let error_handler = spawn_error_handler(
            Arc::clone(&self.gateway),
            events.errors,
            self.config.connection.reconnect_delay(),
            fatal_tx,
        );

        let mut workers = Workers {
            dispatcher,
            stop_dispatch: Some(stop_dispatch),
            error_handler,
        };
        let outcome = self.serve(shutdown, fatal_rx, &mut workers).await;

        workers.abort();
        outcome
    }

    async fn serve<F>(
        &mut self,
        shutdown: F,
        mut fatal_rx: mpsc::Receiver<GatewayError>,
        workers: &mut Workers,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.transition(LifecycleState::LoggingIn)?;
        let session = self.establish_session().await?;
        self.sessions
            .write(&session)
            .await
            .inspect_err(|e| error!("error saving session: {}", e))?;

        self.transition(LifecycleState::Connected)?;
        match self.gateway.admin_test().await {
            Ok(true) => info!("Device reachable, waiting for messages"),
            Ok(false) => {
                error!("error pinging in: device not reachable");
                return Err(Error::Lifecycle("liveness check failed".to_string()));
            }
            Err(e) => {
                error!("error pinging in: {}", e);
                return Err(e.into());
            }
        }

        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut shutdown => {}
            Some(err) = fatal_rx.recv() => {
                error!("Fatal gateway error: {}", err);
                return Err(err.into());
            }
        }

        self.transition(LifecycleState::ShuttingDown)?;
        info!("Shutting down now.");
        workers.drain().await;

        let session = self
            .gateway
            .disconnect()
            .await
            .inspect_err(|e| error!("error disconnecting: {}", e))?;

        // Losing the final session here forces a fresh login next start.
        self.sessions
            .write(&session)
            .await
            .inspect_err(|e| error!("error saving session: {}", e))?;

        self.transition(LifecycleState::Terminated)?;
        info!("Shutdown complete");
        Ok(())
    }

    /// Restore the persisted session, or log in interactively
    async fn establish_session(&self) -> Result<SessionToken> {
        if let Some(saved) = self.sessions.read().await {
            info!("Restoring saved session");
            return self
                .gateway
                .restore_with_session(saved)
                .await
                .inspect_err(|e| error!("restoring failed: {}", e))
                .map_err(Error::from);
        }

        info!("No saved session, starting interactive login");
        let (pairing_tx, pairing_rx) = oneshot::channel();
        let pairing = spawn_pairing_task(pairing_rx, self.config.storage.qrcode_path());

        let result = self.gateway.login(pairing_tx).await;
        pairing.abort();

        result
            .inspect(|_| info!("Login successful"))
            .inspect_err(|e| error!("error during login: {}", e))
            .map_err(Error::from)
    }
}

/// Background tasks owned by a running lifecycle
struct Workers {
    dispatcher: JoinHandle<()>,
    stop_dispatch: Option<oneshot::Sender<()>>,
    error_handler: JoinHandle<()>,
}

impl Workers {
    /// Stop error handling, then let the dispatcher finish its current message
    async fn drain(&mut self) {
        self.error_handler.abort();
        if let Some(stop) = self.stop_dispatch.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.dispatcher).await {
            if !e.is_cancelled() {
                warn!("Dispatcher ended abnormally: {}", e);
            }
        }
    }

    fn abort(&self) {
        self.error_handler.abort();
        self.dispatcher.abort();
    }
}

/// Feed messages from `source` through the filter into the responder,
/// one at a time
///
/// `stop` ends the loop between messages; a message being handled is
/// always finished first.
pub(crate) fn spawn_dispatcher<S, G>(
    mut source: S,
    filter: MessageFilter,
    responder: Responder<G>,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()>
where
    S: MessageSource + 'static,
    G: Gateway + 'static,
{
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = &mut stop => {
                    debug!("Dispatcher stopping");
                    break;
                }
                msg = source.next_message() => match msg {
                    Some(msg) => msg,
                    None => {
                        debug!("Message source closed");
                        break;
                    }
                },
            };

            match filter.evaluate(&msg) {
                Verdict::Respond(sender) => {
                    let outcome = responder.respond(&sender).await;
                    debug!("Handled message from {}: {:?}", sender, outcome);
                }
                Verdict::Ignore(reason) => {
                    debug!("Ignoring message from {}: {:?}", msg.sender, reason);
                }
            }
        }
    })
}

/// Handle errors reported by the gateway
///
/// Connection failures wait `delay`, then try one restore; a failed restore
/// is forwarded on `fatal`. Anything else is logged.
pub(crate) fn spawn_error_handler<G>(
    gateway: Arc<G>,
    mut errors: mpsc::Receiver<GatewayError>,
    delay: Duration,
    fatal: mpsc::Sender<GatewayError>,
) -> JoinHandle<()>
where
    G: Gateway + 'static,
{
    tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            if !err.is_connection_failure() {
                warn!("error occurred: {}", err);
                continue;
            }

            warn!("{}", err);
            info!("Waiting {}s...", delay.as_secs());
            tokio::time::sleep(delay).await;
            info!("Reconnecting...");

            if let Err(e) = gateway.restore().await {
                error!("Restore failed: {}", e);
                let _ = fatal.send(e).await;
                return;
            }
            info!("Reconnected");
        }
    })
}
