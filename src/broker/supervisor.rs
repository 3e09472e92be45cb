use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    broker::{BrokerChannel, BrokerConnector, LinkEvent, LinkEvents, Topology},
    config::Config,
    error::{DispatchError, Result},
    models::{retry::RetryPolicy, status::ConnectionState},
    utils::retry_with_backoff,
};

struct Link {
    generation: u64,
    channel: Arc<dyn BrokerChannel>,
}

/// How the most recent connect sequence failed.
#[derive(Debug, Clone)]
enum SequenceFailure {
    Unavailable { attempts: u32, reason: String },
    Topology(String),
}

impl SequenceFailure {
    fn to_error(&self) -> DispatchError {
        match self {
            Self::Unavailable { attempts, reason } => DispatchError::BrokerUnavailable {
                attempts: *attempts,
                reason: reason.clone(),
            },
            Self::Topology(reason) => DispatchError::Topology(reason.clone()),
        }
    }
}

/// Owns the single broker link of the process.
///
/// A link is one connection plus one channel, tagged with a generation that
/// grows on every connect sequence. Close events reported for an older
/// generation are ignored. Connect sequences are single-flighted: callers that
/// arrive while one is running wait for it and share its outcome, whether
/// that is the new channel or the failure.
pub struct BrokerSupervisor {
    url: String,
    connector: Arc<dyn BrokerConnector>,
    topology: Topology,
    boot_policy: RetryPolicy,
    degraded_policy: RetryPolicy,

    link: RwLock<Option<Link>>,
    connect_lock: Mutex<()>,
    sequences: AtomicU64,
    last_failure: SyncMutex<Option<SequenceFailure>>,
    state: watch::Sender<ConnectionState>,

    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: SyncMutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    monitor: SyncMutex<Option<JoinHandle<()>>>,

    generation: AtomicU64,
    attempts: AtomicU64,
    shutdown: CancellationToken,
}

impl BrokerSupervisor {
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn BrokerConnector>,
        topology: Topology,
        boot_policy: RetryPolicy,
        degraded_policy: RetryPolicy,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Arc::new(Self {
            url: url.into(),
            connector,
            topology,
            boot_policy,
            degraded_policy,
            link: RwLock::new(None),
            connect_lock: Mutex::new(()),
            sequences: AtomicU64::new(0),
            last_failure: SyncMutex::new(None),
            state,
            events_tx,
            events_rx: SyncMutex::new(Some(events_rx)),
            monitor: SyncMutex::new(None),
            generation: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn from_config(config: &Config, connector: Arc<dyn BrokerConnector>) -> Arc<Self> {
        Self::new(
            config.rabbitmq_url.clone(),
            connector,
            Topology::notifications(config.dead_letter_exchange.as_deref()),
            config.connect_policy(),
            config.reconnect_policy(),
        )
    }

    /// Boot sequence: connects within the boot budget, declares the topology
    /// and starts watching the link for unexpected closes.
    ///
    /// Fails with `BrokerUnavailable` once the boot budget is exhausted.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.connect().await?;

        if let Some(events) = self.events_rx.lock().take() {
            let supervisor = Arc::clone(self);
            let handle = tokio::spawn(async move { supervisor.monitor_link(events).await });
            *self.monitor.lock() = Some(handle);
        }

        Ok(())
    }

    /// Establishes a link using the boot retry budget.
    pub async fn connect(&self) -> Result<Arc<dyn BrokerChannel>> {
        self.establish(&self.boot_policy).await
    }

    /// Returns the open channel, reconnecting with the degraded budget when
    /// the link is gone.
    pub async fn ensure_connected(&self) -> Result<Arc<dyn BrokerChannel>> {
        if let Some(channel) = self.open_channel() {
            return Ok(channel);
        }

        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Transport(
                "broker supervisor is shut down".to_string(),
            ));
        }

        debug!("Broker channel unavailable, entering reconnect");
        self.establish(&self.degraded_policy).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connect attempts made since construction, across all sequences.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Generation of the most recent connect sequence. Zero before the first.
    pub fn link_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops the link monitor and closes the channel.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let monitor = self.monitor.lock().take();
        if let Some(handle) = monitor {
            if let Err(e) = handle.await {
                warn!(error = %e, "Broker link monitor ended abnormally");
            }
        }

        let _guard = self.connect_lock.lock().await;
        let link = self.link.write().take();

        if let Some(link) = link {
            if let Err(e) = link.channel.close().await {
                warn!(error = %e, "Failed to close broker channel");
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!("Broker connection closed");
    }

    fn open_channel(&self) -> Option<Arc<dyn BrokerChannel>> {
        self.link
            .read()
            .as_ref()
            .filter(|link| link.channel.is_open())
            .map(|link| Arc::clone(&link.channel))
    }

    async fn establish(&self, policy: &RetryPolicy) -> Result<Arc<dyn BrokerChannel>> {
        let observed = self.sequences.load(Ordering::SeqCst);
        let _guard = self.connect_lock.lock().await;

        // Another caller may have finished a sequence while we waited.
        if let Some(channel) = self.open_channel() {
            return Ok(channel);
        }

        if self.sequences.load(Ordering::SeqCst) != observed {
            if let Some(failure) = self.last_failure.lock().as_ref() {
                debug!("Sharing the outcome of a connect sequence that failed while waiting");
                return Err(failure.to_error());
            }
        }

        let result = self.run_sequence(policy).await;

        *self.last_failure.lock() = match &result {
            Ok(_) => None,
            Err(DispatchError::Topology(reason)) => Some(SequenceFailure::Topology(reason.clone())),
            Err(DispatchError::BrokerUnavailable { attempts, reason }) => {
                Some(SequenceFailure::Unavailable {
                    attempts: *attempts,
                    reason: reason.clone(),
                })
            }
            Err(other) => Some(SequenceFailure::Unavailable {
                attempts: policy.max_attempts,
                reason: other.to_string(),
            }),
        };
        self.sequences.fetch_add(1, Ordering::SeqCst);

        result
    }

    /// One connect sequence. Callers hold `connect_lock`.
    async fn run_sequence(&self, policy: &RetryPolicy) -> Result<Arc<dyn BrokerChannel>> {
        self.state.send_replace(ConnectionState::Connecting);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let max_attempts = policy.max_attempts;

        let channel = match retry_with_backoff(policy, move |attempt| {
            self.connect_once(attempt, max_attempts, generation)
        })
        .await
        {
            Ok(channel) => channel,
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                error!(
                    max_attempts,
                    error = %e,
                    "Broker unavailable, connect attempts exhausted"
                );
                return Err(DispatchError::BrokerUnavailable {
                    attempts: max_attempts,
                    reason: e.to_string(),
                });
            }
        };

        if let Err(e) = self.topology.declare(channel.as_ref()).await {
            if let Err(close_err) = channel.close().await {
                debug!(error = %close_err, "Failed to close channel after topology error");
            }
            self.state.send_replace(ConnectionState::Disconnected);
            return Err(e);
        }

        *self.link.write() = Some(Link {
            generation,
            channel: Arc::clone(&channel),
        });
        self.state.send_replace(ConnectionState::Connected);

        info!(generation, "Broker link established");
        Ok(channel)
    }

    async fn connect_once(
        &self,
        attempt: u32,
        max_attempts: u32,
        generation: u64,
    ) -> Result<Arc<dyn BrokerChannel>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        info!(attempt, max_attempts, "Connecting to broker");

        let events = LinkEvents::new(generation, self.events_tx.clone());

        match self.connector.connect(&self.url, events).await {
            Ok(channel) => {
                info!(attempt, max_attempts, "Connected to broker");
                Ok(channel)
            }
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "Broker connection attempt failed"
                );
                Err(e)
            }
        }
    }

    async fn monitor_link(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                LinkEvent::Closed { generation, reason } => {
                    if !self.invalidate(generation) {
                        debug!(generation, "Ignoring close event of a replaced link");
                        continue;
                    }

                    warn!(generation, reason = %reason, "Broker link closed, reconnecting");
                    self.recover().await;
                }
            }
        }

        debug!("Broker link monitor stopped");
    }

    /// Drops the current link if it belongs to `generation`.
    fn invalidate(&self, generation: u64) -> bool {
        let mut link = self.link.write();

        match link.as_ref() {
            Some(current) if current.generation == generation => {
                *link = None;
                self.state.send_replace(ConnectionState::Disconnected);
                true
            }
            _ => false,
        }
    }

    /// Keeps running degraded connect sequences until one succeeds or the
    /// supervisor shuts down.
    async fn recover(&self) {
        loop {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                result = self.establish(&self.degraded_policy) => result,
            };

            match result {
                Ok(_) => return,
                Err(e) => {
                    error!(error = %e, "Broker reconnect sequence failed, starting another");

                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = sleep(self.degraded_policy.backoff.delay_for(0)) => {}
                    }
                }
            }
        }
    }
}
