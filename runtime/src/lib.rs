//! # Seckill Runtime
//!
//! Operational plumbing shared by the seckill services:
//!
//! - [`retry`]: exponential backoff for connecting to infrastructure and
//!   re-establishing broker subscriptions
//! - [`metrics`]: Prometheus recorder and the metric helpers every component
//!   reports through

pub mod metrics;
pub mod retry;
