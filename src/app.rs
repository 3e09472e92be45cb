use std::{sync::Arc, time::Duration};

use anyhow::{Context, Error, Result};
use parking_lot::Mutex;
use tracing::info;

use crate::{
    broker::{BrokerConnector, BrokerSupervisor, Consumer, Publisher, Subscription},
    clients::{health::HealthChecker, users::UserDirectory},
    config::Config,
    models::notification::NotificationType,
    notification::{
        EmailNotificationObserver, JOB_QUEUE_NAME, NotificationProcessor, NotificationSender,
        NotificationService,
    },
    queue::{JobQueueEngine, JobStore},
};

/// External collaborators the dispatch core is wired to.
pub struct Dependencies {
    pub connector: Arc<dyn BrokerConnector>,
    pub job_store: Arc<dyn JobStore>,
    pub users: Arc<dyn UserDirectory>,
    pub sender: Arc<dyn NotificationSender>,
}

/// A started dispatch core. Requests may only be accepted once `start` has
/// returned.
pub struct NotificationDispatch {
    pub supervisor: Arc<BrokerSupervisor>,
    pub engine: Arc<JobQueueEngine>,
    pub service: Arc<NotificationService>,
    job_store: Arc<dyn JobStore>,
    subscription: Mutex<Option<Subscription>>,
}

impl NotificationDispatch {
    /// Connects the broker, starts the job workers and the bus consumer, in
    /// that order. Any failure is fatal.
    pub async fn start(config: &Config, deps: Dependencies) -> Result<Self, Error> {
        let supervisor = BrokerSupervisor::from_config(config, Arc::clone(&deps.connector));

        supervisor
            .start()
            .await
            .context("Failed to connect to message broker")?;

        match Self::start_channels(config, Arc::clone(&supervisor), deps).await {
            Ok(dispatch) => {
                info!("Notification dispatch started");
                Ok(dispatch)
            }
            Err(e) => {
                supervisor.shutdown().await;
                Err(e)
            }
        }
    }

    async fn start_channels(
        config: &Config,
        supervisor: Arc<BrokerSupervisor>,
        deps: Dependencies,
    ) -> Result<Self, Error> {
        let engine =
            Arc::new(JobQueueEngine::new().with_poll_interval(config.job_poll_interval()));

        engine
            .register_queue(JOB_QUEUE_NAME, Arc::clone(&deps.job_store))
            .await
            .context("Failed to register notification job queue")?;

        Arc::new(NotificationProcessor::new(deps.sender))
            .register(&engine)
            .context("Failed to register notification job handler")?;

        engine.start_workers(JOB_QUEUE_NAME, config.worker_concurrency)?;

        let subscription = Consumer::new(Arc::clone(&supervisor))
            .with_resubscribe_delay(Duration::from_millis(config.reconnect_retry_delay_ms))
            .consume(
                &NotificationType::Email.queue_name(),
                Arc::new(EmailNotificationObserver),
            )
            .await;

        let subscription = match subscription {
            Ok(subscription) => subscription,
            Err(e) => {
                engine.shutdown().await;
                return Err(Error::new(e).context("Failed to start email notification consumer"));
            }
        };

        let service = Arc::new(NotificationService::new(
            deps.users,
            Publisher::new(Arc::clone(&supervisor)),
            Arc::clone(&engine),
        ));

        Ok(Self {
            supervisor,
            engine,
            service,
            job_store: deps.job_store,
            subscription: Mutex::new(Some(subscription)),
        })
    }

    pub fn health_checker(&self) -> HealthChecker {
        HealthChecker::new(Arc::clone(&self.supervisor), Arc::clone(&self.job_store))
    }

    /// Stops consuming, lets in-flight jobs finish, then closes the broker link.
    pub async fn shutdown(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.cancel().await;
        }

        self.engine.shutdown().await;
        self.supervisor.shutdown().await;

        info!("Notification dispatch stopped");
    }
}
