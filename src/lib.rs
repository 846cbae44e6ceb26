//! # devdock
//!
//! A manager for locally-defined development projects, each composed of one
//! or more long-running services (a frontend dev server, a backend API
//! process, and so on).
//!
//! ## Features
//!
//! - **Service Lifecycle**: Start and stop services as child processes with
//!   a strict status state machine (`Stopped → Starting → Running →
//!   Stopping → Stopped`, plus `Crashed` on unexpected exit)
//! - **Port Allocation**: Claim tracking with managed-vs-external conflict
//!   detection and deterministic free-port suggestions
//! - **Bounded Logs**: Per-service in-memory ring buffers with FIFO eviction
//! - **Process Reconciliation**: Scans the OS process table to recover state
//!   after a restart and to detect services killed outside the tool
//!
//! ## Quick Start
//!
//! ```no_run
//! use devdock::registry::Registry;
//! use devdock::store::Store;
//!
//! # async fn example() -> Result<(), devdock::Error> {
//! let store = Store::open_default()?;
//! let registry = Registry::open(store)?;
//!
//! let outcomes = registry.start_project("my-app").await?;
//! for outcome in &outcomes {
//!     println!("{}: {}", outcome.service_id, outcome.result.is_ok());
//! }
//!
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Each service owns a per-service transition lock serialising `start`,
//! `stop`, and the exit watcher, so status transitions are totally ordered
//! per service. Unrelated services start and stop concurrently; the port
//! allocator's claim table is the only structure shared across them.

pub mod detect;
pub mod error;
pub mod logbuf;
pub mod port;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use error::{Error, Result};
pub use logbuf::LogBuffer;
pub use port::{ConflictKind, PortAllocator, PortClaim};
pub use registry::{Project, Registry};
pub use scanner::{Confidence, ScanMatch};
pub use service::{ServiceHandle, ServiceKind, ServiceSpec, Status};
pub use store::Store;
