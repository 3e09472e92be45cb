pub mod health;
pub mod job;
pub mod notification;
pub mod response;
pub mod retry;
pub mod stats;
pub mod status;
pub mod user;
