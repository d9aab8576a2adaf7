pub mod bootstrap;
pub mod commands;
pub mod data_sync;
pub mod notifications;
pub mod session;
pub mod transfer;
