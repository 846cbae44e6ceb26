//! OS process scanning and project matching.
//!
//! The scanner reconciles the registry's in-memory view with reality: it
//! enumerates the process table, matches processes to known project roots,
//! and lets the registry detect externally-killed services and suggest
//! adoption of externally-started ones.

pub mod matcher;
pub mod process_table;

pub use matcher::{match_processes, Confidence, ScanMatch};
pub use process_table::{OsProcess, ProcessTable, SystemProcessTable};
