pub mod auth;
pub mod broker;
pub mod error;
pub mod storage;
pub mod utils;
