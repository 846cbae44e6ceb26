//! Service process management: spawning, output capture, and shutdown.

pub mod handle;
pub mod types;

pub use handle::{ServiceHandle, StopOutcome, DEFAULT_GRACE_PERIOD};
pub use types::{ServiceKind, ServiceSpec, ServiceStatusView, Status};
