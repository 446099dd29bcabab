//! # Seckill
//!
//! Flash-sale coordination services built on the ports in `seckill-core`.
//!
//! # Architecture
//!
//! ```text
//!                 ┌────────────────────┐
//! CreateOrder ──► │  OrderCoordinator  │──► OrderRepository (Pending)
//!                 └─────────┬──────────┘          │
//!                           │ Admission           │
//!                           ▼                     ▼
//!            lock ─► ledger ─► window ─► stock   OrderProducer ──► broker
//!                                  │                                 │
//!                          StockFlusher (mirror)                     ▼
//!                                                   OrderConsumer (Pending ─► Created)
//!                                                                    ▲
//!                                   OrderReconciler (every interval) ┘
//! ```
//!
//! - [`admission`]: the lock-protected admission path shared by order
//!   creation and direct stock deduction
//! - [`activity`] / [`order`]: request-facing services
//! - [`client`]: capability traits answering with the response envelope
//! - [`producer`] / [`consumer`]: the order-event pipeline
//! - [`reconciler`] / [`flusher`]: background repair and mirroring
//! - [`supervisor`]: start/stop of background tasks
//! - [`app`]: wiring of ports into services
//! - [`config`]: environment configuration

pub mod activity;
pub mod admission;
pub mod app;
pub mod client;
pub mod config;
pub mod consumer;
pub mod flusher;
pub mod info;
pub mod order;
pub mod producer;
pub mod reconciler;
pub mod supervisor;

pub use activity::ActivityService;
pub use app::{Ports, Services};
pub use client::{ActivityClient, OrderClient};
pub use config::Config;
pub use order::OrderCoordinator;
pub use supervisor::Supervisor;
