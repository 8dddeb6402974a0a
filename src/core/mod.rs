mod checks;
mod engine;
mod error;
pub mod insights;
pub(crate) mod metrics;
mod sensitivity;
mod types;

pub use checks::check_projection_consistency;
pub use engine::{
    ProjectionSeed, ProjectionSettings, ValuationSettings, calculate_dcf, project_financials,
    run_scenarios,
};
pub use error::{DataError, ValidationError};
pub use metrics::{calculate_historical_metrics, validate_financials, validate_statement};
pub use sensitivity::{NOT_COMPUTABLE, calculate_sensitivity_grid, classify_driver};
pub use types::{
    BALANCE_SHEET, BalanceSheetRow, CASH_FLOW, CashFlowRow, Driver, HistoricalRecord,
    INCOME_STATEMENT, IncomeStatementRow, MarginBasis, NamedScenario, ProjectionRow,
    RawFinancials, ScenarioFailure, ScenarioParams, ScenarioRun, SensitivityGrid, StatementRow,
    ValuationResult, Warning, WarningKind,
};
