use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use super::error::ValidationError;

pub const INCOME_STATEMENT: &str = "income_statement";
pub const BALANCE_SHEET: &str = "balance_sheet";
pub const CASH_FLOW: &str = "cash_flow";

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct IncomeStatementRow {
    pub year: i32,
    pub revenue: f64,
    pub cogs: f64,
    pub opex: f64,
    pub depreciation: f64,
    pub interest_expense: f64,
    pub taxes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BalanceSheetRow {
    pub year: i32,
    pub cash: f64,
    pub receivables: f64,
    pub inventory: f64,
    pub payables: f64,
    pub debt_short: f64,
    pub debt_long: f64,
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CashFlowRow {
    pub year: i32,
    pub cfo: f64,
    pub capex: f64,
    pub cfi_other: f64,
    pub cff_other: f64,
}

/// A yearly record of one of the three raw statements.
pub trait StatementRow {
    const TABLE: &'static str;
    /// Required columns, `year` first.
    const COLUMNS: &'static [&'static str];

    fn year(&self) -> i32;
    fn values(&self) -> Vec<(&'static str, f64)>;
}

impl StatementRow for IncomeStatementRow {
    const TABLE: &'static str = INCOME_STATEMENT;
    const COLUMNS: &'static [&'static str] = &[
        "year",
        "revenue",
        "cogs",
        "opex",
        "depreciation",
        "interest_expense",
        "taxes",
    ];

    fn year(&self) -> i32 {
        self.year
    }

    fn values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("revenue", self.revenue),
            ("cogs", self.cogs),
            ("opex", self.opex),
            ("depreciation", self.depreciation),
            ("interest_expense", self.interest_expense),
            ("taxes", self.taxes),
        ]
    }
}

impl StatementRow for BalanceSheetRow {
    const TABLE: &'static str = BALANCE_SHEET;
    const COLUMNS: &'static [&'static str] = &[
        "year",
        "cash",
        "receivables",
        "inventory",
        "payables",
        "debt_short",
        "debt_long",
        "equity",
    ];

    fn year(&self) -> i32 {
        self.year
    }

    fn values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("cash", self.cash),
            ("receivables", self.receivables),
            ("inventory", self.inventory),
            ("payables", self.payables),
            ("debt_short", self.debt_short),
            ("debt_long", self.debt_long),
            ("equity", self.equity),
        ]
    }
}

impl StatementRow for CashFlowRow {
    const TABLE: &'static str = CASH_FLOW;
    const COLUMNS: &'static [&'static str] = &["year", "cfo", "capex", "cfi_other", "cff_other"];

    fn year(&self) -> i32 {
        self.year
    }

    fn values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("cfo", self.cfo),
            ("capex", self.capex),
            ("cfi_other", self.cfi_other),
            ("cff_other", self.cff_other),
        ]
    }
}

/// The three yearly statements as loaded, before any joining.
#[derive(Debug, Clone, Default)]
pub struct RawFinancials {
    pub income_statement: Vec<IncomeStatementRow>,
    pub balance_sheet: Vec<BalanceSheetRow>,
    pub cash_flow: Vec<CashFlowRow>,
}

/// One merged historical year with the derived operating metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalRecord {
    pub year: i32,
    pub revenue: f64,
    pub cogs: f64,
    pub opex: f64,
    pub depreciation: f64,
    pub interest_expense: f64,
    pub taxes: f64,
    pub cash: f64,
    pub receivables: f64,
    pub inventory: f64,
    pub payables: f64,
    pub debt_short: f64,
    pub debt_long: f64,
    pub equity: f64,
    pub cfo: f64,
    pub capex: f64,
    pub cfi_other: f64,
    pub cff_other: f64,
    pub nwc: f64,
    pub delta_nwc: f64,
    pub ebit: f64,
    pub nopat: f64,
    pub fcf: f64,
}

impl HistoricalRecord {
    pub fn ebit_margin(&self) -> Option<f64> {
        (self.revenue != 0.0).then(|| self.ebit / self.revenue)
    }
}

/// Assumption bundle for one named scenario.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ScenarioParams {
    pub revenue_growth: f64,
    pub ebit_margin: f64,
    pub wacc: f64,
    pub terminal_g: f64,
    pub capex_pct_rev: f64,
    pub depreciation_pct_capex: f64,
    pub nwc_pct_rev_change: f64,
}

/// Where the projector takes its EBIT margin from.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarginBasis {
    #[default]
    Scenario,
    LastHistorical,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NamedScenario {
    pub name: String,
    #[serde(flatten)]
    pub params: ScenarioParams,
}

/// One forecast year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionRow {
    pub year: i32,
    pub revenue: f64,
    pub ebit: f64,
    pub nopat: f64,
    pub delta_nwc: f64,
    pub capex: f64,
    pub depreciation: f64,
    pub fcf: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValuationResult {
    pub scenario_name: String,
    pub enterprise_value: f64,
    pub equity_value: f64,
    pub terminal_value: f64,
    pub pv_explicit: f64,
    pub pv_terminal: f64,
    pub terminal_share_pct: f64,
    pub wacc: f64,
    pub terminal_g: f64,
    pub assumptions: ScenarioParams,
    pub projections: Vec<ProjectionRow>,
    pub terminal_share_warning: Option<Warning>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioFailure {
    pub scenario: String,
    pub error: ValidationError,
}

/// Per-scenario outcomes of one run, in configuration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioRun {
    pub results: Vec<ValuationResult>,
    pub failures: Vec<ScenarioFailure>,
}

impl ScenarioRun {
    pub fn get(&self, scenario: &str) -> Option<&ValuationResult> {
        self.results.iter().find(|r| r.scenario_name == scenario)
    }

    pub fn failure(&self, scenario: &str) -> Option<&ScenarioFailure> {
        self.failures.iter().find(|f| f.scenario == scenario)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Driver {
    WaccDriven,
    GrowthDriven,
    Balanced,
}

impl Driver {
    pub fn label(self) -> &'static str {
        match self {
            Driver::WaccDriven => "WACC-driven",
            Driver::GrowthDriven => "growth-driven",
            Driver::Balanced => "balanced",
        }
    }

    pub fn analysis(self) -> &'static str {
        match self {
            Driver::WaccDriven => "Sensitivity driven primarily by WACC changes.",
            Driver::GrowthDriven => "Sensitivity driven primarily by terminal growth changes.",
            Driver::Balanced => "Valuation is sensitive to both WACC and growth similarly.",
        }
    }
}

impl Serialize for Driver {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Enterprise value over a WACC x terminal-growth grid.
///
/// `matrix[i][j]` is the value at `wacc_values[i]`, `terminal_g_values[j]`.
/// Cells where the discount rate does not exceed growth hold
/// [`NOT_COMPUTABLE`](crate::core::NOT_COMPUTABLE).
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityGrid {
    pub wacc_values: Vec<f64>,
    pub terminal_g_values: Vec<f64>,
    pub matrix: Vec<Vec<f64>>,
    pub ev_min: f64,
    pub ev_max: f64,
    /// Median-index cell; approximates, not reproduces, the base valuation.
    pub ev_base: f64,
    pub wacc_impact: f64,
    pub g_impact: f64,
    pub driver: Driver,
}

impl SensitivityGrid {
    pub fn median_wacc_index(&self) -> usize {
        self.wacc_values.len() / 2
    }

    pub fn median_g_index(&self) -> usize {
        self.terminal_g_values.len() / 2
    }

    pub fn is_computable(&self, wacc_index: usize, g_index: usize) -> bool {
        self.wacc_values[wacc_index] > self.terminal_g_values[g_index]
    }

    /// `None` for cells outside the grid or where wacc <= g.
    pub fn cell(&self, wacc_index: usize, g_index: usize) -> Option<f64> {
        let value = *self.matrix.get(wacc_index)?.get(g_index)?;
        self.is_computable(wacc_index, g_index).then_some(value)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WarningKind {
    TerminalShare,
    MarginDrift,
    MissingFade,
    ReinvestmentGap,
}

/// Scenario-tagged, human-readable finding. Never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub scenario: String,
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(scenario: &str, kind: WarningKind, message: String) -> Self {
        Self {
            scenario: scenario.to_string(),
            kind,
            message,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.message)
    }
}

impl Serialize for Warning {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub(crate) fn fmt_pct(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Rounds to whole units and groups thousands with commas.
pub(crate) fn fmt_amount(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_formatting_groups_thousands() {
        assert_eq!(fmt_amount(0.0), "0");
        assert_eq!(fmt_amount(999.4), "999");
        assert_eq!(fmt_amount(1_234.0), "1,234");
        assert_eq!(fmt_amount(1_234_567.8), "1,234,568");
        assert_eq!(fmt_amount(-45_000.0), "-45,000");
    }

    #[test]
    fn pct_formatting_uses_one_decimal() {
        assert_eq!(fmt_pct(0.2), "20.0%");
        assert_eq!(fmt_pct(0.0345), "3.5%");
    }

    #[test]
    fn warning_displays_and_serializes_with_scenario_tag() {
        let warning = Warning::new("base", WarningKind::MissingFade, "growth too high".into());
        assert_eq!(warning.to_string(), "[base] growth too high");
        let json = serde_json::to_string(&warning).expect("warning should serialize");
        assert_eq!(json, "\"[base] growth too high\"");
    }

    #[test]
    fn grid_cell_hides_non_computable_entries() {
        let grid = SensitivityGrid {
            wacc_values: vec![0.03, 0.10],
            terminal_g_values: vec![0.03],
            matrix: vec![vec![0.0], vec![500.0]],
            ev_min: 500.0,
            ev_max: 500.0,
            ev_base: 500.0,
            wacc_impact: 500.0,
            g_impact: 0.0,
            driver: Driver::WaccDriven,
        };
        assert_eq!(grid.cell(0, 0), None);
        assert_eq!(grid.cell(1, 0), Some(500.0));
        assert_eq!(grid.cell(2, 0), None);
    }
}
