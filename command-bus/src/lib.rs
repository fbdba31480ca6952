#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

//! Request/response command dispatch over the shared broker.

pub mod client;
pub mod commands;
pub mod dispatcher;
pub mod envelope;
pub mod handlers;
pub mod result;

pub use client::RpcClient;
pub use dispatcher::{CommandHandler, Dispatcher, HandlerRegistry};
pub use envelope::RpcEnvelope;
pub use result::RpcResult;
