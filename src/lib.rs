pub mod cli;
pub mod config;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod probe;
pub mod tagger;
pub mod target;

// Re-export key types and functions at the crate root
pub use config::Config;
pub use error::ProbeError;
pub use inventory::{Inventory, InventoryClient, InventoryRecord, TagTarget};
pub use logging::{default_log_dir, init_logging};
pub use probe::{HopResult, Platform, ProbeSession, ProbeStrategy, Prober, TraceOutcome};
pub use tagger::{TagAction, TagSummary, Tagger};
pub use target::Target;
