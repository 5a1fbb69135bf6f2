//! udplink receives line protocol over udp and writes it, in batches, to an influx compatible
//! storage backend. Every configured listener runs as an independent [`Service`] made up of
//! three stages and a batcher, connected by bounded channels:
//!
//!```text
//!   datagrams  ┌────────┐  relay   ┌──────┐  points  ┌────────────┐  batches  ┌────────┐  write  ┌───────┐
//!  ───────────►│Listener├─────────►│Parser├─────────►│PointBatcher├──────────►│Delivery├────────►│Backend│
//!              └────────┘  (1000)  └──────┘          └────────────┘           └───┬────┘         └───────┘
//!                                                                                 │ create database
//!                                                                                 ▼ (once)
//!                                                                             ┌───────┐
//!                                                                             │Catalog│
//!                                                                             └───────┘
//!```
//!
//! None of the channels grow without bound. A slow backend blocks delivery, which fills up the
//! batcher, which blocks the parser, which stops the listener from reading. Excess datagrams are
//! then dropped by the kernel, not by udplink.

pub mod base;
pub mod cli;
pub mod collector;
pub mod config;
pub mod mock;
pub mod service;

pub use base::batcher::PointBatcher;
pub use base::http::{HttpCatalog, HttpWriter};
pub use base::stats::{Statistic, StatisticsSnapshot};
pub use base::writer::{Catalog, ConsistencyLevel, PointsWriter};
pub use base::{FieldValue, Point};
pub use config::{AppConfig, Config, Precision};
pub use service::{Service, ServiceHandle, State};
