//! Request-interception cache and offline sync queue.
//!
//! Every outgoing request goes through [`engine::InterceptionEngine::handle`],
//! which classifies it and answers from a local cache store, the network, or
//! a synthesized offline response. Writes that cannot be delivered are kept
//! in a durable [`sync::SyncQueue`] and replayed when connectivity returns.
//! [`lifecycle::LifecycleManager`] rolls cache stores over between
//! deployment versions.

pub mod cache;
pub mod classify;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod offline;
pub mod sync;

#[cfg(test)]
mod testing;
