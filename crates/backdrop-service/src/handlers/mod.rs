//! API handlers.

pub mod accounts;
pub mod credits;
pub mod cron;
pub mod health;
pub mod jobs;
pub mod webhooks;
