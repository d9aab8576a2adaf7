pub mod auth_client;
pub mod config;
pub mod connectivity;
pub mod credential_store;
pub mod error;
pub mod local_store;
pub mod logging;
pub mod record_mapper;
pub mod remote_store;
pub mod storage;
