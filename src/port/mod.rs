pub mod allocator;
pub mod probe;

pub use allocator::{PortAllocator, PortClaim};
pub use probe::{PortOccupant, SocketProbe, SystemProbe};

// Re-exported here so allocator callers don't need to reach into `error`.
pub use crate::error::ConflictKind;
