pub mod availability;
pub mod calendar;
pub mod chat;
pub mod engine;
pub mod graph;
pub mod http;
pub mod init;
pub mod reminders;
pub mod status;
pub mod subscriptions;
pub mod users;
pub mod views;
pub mod webhooks;
