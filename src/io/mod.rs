//! File-system edges of the pipeline: statement CSVs in, artifacts out.

pub mod export;
pub mod loader;

pub use export::{
    EXPORT_FILES, PROJECTIONS_FILE, RUN_LOG_FILE, SENSITIVITY_FILE, SUMMARY_FILE, Summary,
    write_outputs,
};
pub use loader::{load_financials, load_statement};
