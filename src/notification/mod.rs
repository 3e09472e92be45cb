//! User notification fan-out over the bus and the job queue.

pub mod observer;
pub mod processor;
pub mod service;
pub mod stats;

pub use observer::EmailNotificationObserver;
pub use processor::{LogEmailSender, NotificationProcessor, NotificationSender};
pub use service::{DispatchReceipt, NotificationService};
pub use stats::StatsAggregator;

/// Job queue holding notification delivery jobs.
pub const JOB_QUEUE_NAME: &str = "user-notifications";

pub const PROCESS_NOTIFICATION_JOB: &str = "process-notification";
