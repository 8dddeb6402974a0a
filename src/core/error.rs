use std::path::PathBuf;

use thiserror::Error;

/// Structural problems with the raw financial statements.
///
/// Any of these is fatal to a run: nothing is valued once one is raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("missing columns in {table}: {}", .columns.join(", "))]
    MissingColumns { table: String, columns: Vec<String> },

    #[error("years in {table} must be sorted in ascending order")]
    UnsortedYears { table: String },

    #[error("duplicate year {year} found in {table}")]
    DuplicateYear { table: String, year: i32 },

    #[error("missing or non-finite value in {table} for year {year}: {column}")]
    MissingValue {
        table: String,
        year: i32,
        column: String,
    },

    #[error("could not read {table}: {message}")]
    Unreadable { table: String, message: String },

    #[error("{table} has no rows")]
    EmptyTable { table: String },

    #[error("income statement, balance sheet and cash flow share no common year")]
    NoCommonYears,
}

/// Numeric preconditions violated by a single valuation.
///
/// Scoped to one scenario; other scenarios keep running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error(
        "[{scenario}] terminal growth must be less than discount rate (g = {terminal_g}, wacc = {wacc})"
    )]
    TerminalGrowthNotBelowDiscountRate {
        scenario: String,
        wacc: f64,
        terminal_g: f64,
    },

    #[error("[{scenario}] projection has no rows to discount")]
    EmptyProjection { scenario: String },

    #[error("sensitivity axis `{axis}` has no values")]
    EmptyAxis { axis: &'static str },

    #[error("sensitivity grid needs at least one projected cash flow")]
    EmptyCashFlowPath,
}

impl ValidationError {
    pub fn scenario(&self) -> Option<&str> {
        match self {
            ValidationError::TerminalGrowthNotBelowDiscountRate { scenario, .. }
            | ValidationError::EmptyProjection { scenario } => Some(scenario),
            ValidationError::EmptyAxis { .. } | ValidationError::EmptyCashFlowPath => None,
        }
    }
}
