//! # Seckill Core
//!
//! Domain types and port traits for the seckill (flash-sale) coordination subsystem.
//!
//! A seckill activity sells a strictly limited inventory under very high
//! concurrent demand. This crate defines the vocabulary shared by every other
//! crate in the workspace:
//!
//! - [`types`]: activities, orders, identifiers and money
//! - [`error`]: the error taxonomy every service maps its failures onto
//! - [`response`]: the `{code, msg, data}` envelope returned to callers
//! - [`keys`]: the cache key namespace
//! - [`message`]: the order-creation event carried by the broker
//! - Ports: [`stock::StockStore`], [`lock::DistributedLock`],
//!   [`ledger::ParticipationLedger`], [`cache::ActivityCache`],
//!   [`repository::ActivityRepository`], [`repository::OrderRepository`]
//!   and [`broker::MessageBroker`]
//!
//! # Architecture
//!
//! ```text
//! request ──► lock ──► ledger ──► activity ──► stock ──► order ──► broker
//!              │                                  │                 │
//!              └──────── cache tier ──────────────┘                 ▼
//!                                                              consumer
//!                                                     (Pending ──► Created)
//! ```
//!
//! The cache tier (stock, lock, ledger) decides admission at request time. The
//! durable tier (repositories) is the source of truth for orders and is
//! eventually consistent with the cache.
//!
//! Every port is dyn-compatible so services can hold `Arc<dyn Port>` handles
//! injected at process start.

pub mod broker;
pub mod cache;
pub mod context;
pub mod environment;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod lock;
pub mod message;
pub mod repository;
pub mod response;
pub mod stock;
pub mod types;

pub use error::{BrokerError, Rejection, RepositoryError, SeckillError, StoreError};
pub use response::{Response, ResponseCode};
