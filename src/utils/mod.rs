//! Utility modules for the channels CLI

pub mod errors;
pub mod logger;
pub mod progress;
pub mod table;

pub use errors::{CliError, enhance_error};
pub use logger::{init_tracing, log_error, log_info, log_warn};
pub use table::print_table;
