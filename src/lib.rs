//! # connpool
//!
//! A lock-free pool for reusable network connections.
//!
//! ## Features
//!
//! - Lock-free, stack-ordered free-list: the most recently returned
//!   connection is handed out first
//! - Capacity bound on idle connections, with rejected connections closed
//! - Warm-up of an initial number of connections
//! - Background reaping of connections idle longer than a timeout
//! - Async helpers that dial and shut down on tokio's blocking pool
//! - Metrics with Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use connpool::{Options, Pool};
//! use std::net::{TcpListener, TcpStream};
//! use std::time::Duration;
//!
//! let listener = TcpListener::bind("127.0.0.1:0").unwrap();
//! let addr = listener.local_addr().unwrap();
//!
//! let opts = Options::new()
//!     .with_max_cap(8)
//!     .with_idle_timeout(Duration::from_secs(90));
//! let pool = Pool::new(opts, move || TcpStream::connect(addr)).unwrap();
//!
//! let conn = pool.get().unwrap();
//! // ... use the connection ...
//! pool.put(conn);
//!
//! pool.close().unwrap();
//! ```

mod config;
mod connection;
mod errors;
mod metrics;
mod pool;
mod reaper;
mod stack;

pub use config::{Options, DEFAULT_MAX_CAP, DEFAULT_REAP_INTERVAL};
pub use connection::Connection;
pub use errors::{PoolError, PoolResult};
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::Pool;
