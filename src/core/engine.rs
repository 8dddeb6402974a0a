use tracing::{debug, warn};

use super::error::ValidationError;
use super::types::{
    HistoricalRecord, MarginBasis, NamedScenario, ProjectionRow, ScenarioFailure, ScenarioParams,
    ScenarioRun, ValuationResult, Warning, WarningKind, fmt_pct,
};

/// Last historical year as seen by the projector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionSeed {
    pub year: i32,
    pub revenue: f64,
    pub ebit_margin: f64,
}

impl From<&HistoricalRecord> for ProjectionSeed {
    fn from(record: &HistoricalRecord) -> Self {
        Self {
            year: record.year,
            revenue: record.revenue,
            ebit_margin: record.ebit_margin().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionSettings {
    pub years_forecast: u32,
    pub tax_rate: f64,
    pub margin_basis: MarginBasis,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuationSettings {
    pub projection: ProjectionSettings,
    pub net_debt: f64,
    pub terminal_share_threshold: f64,
}

/// Rolls revenue forward `years_forecast` times and derives each year's
/// free cash flow from it.
///
/// Capex scales with revenue, NWC with the change in revenue, and
/// depreciation is a fixed share of capex.
pub fn project_financials(
    seed: ProjectionSeed,
    params: &ScenarioParams,
    settings: &ProjectionSettings,
) -> Vec<ProjectionRow> {
    let ebit_margin = match settings.margin_basis {
        MarginBasis::Scenario => params.ebit_margin,
        MarginBasis::LastHistorical => seed.ebit_margin,
    };

    let mut rows = Vec::with_capacity(settings.years_forecast as usize);
    let mut previous_revenue = seed.revenue;

    for step in 1..=settings.years_forecast {
        let revenue = previous_revenue * (1.0 + params.revenue_growth);
        let delta_revenue = revenue - previous_revenue;
        previous_revenue = revenue;

        let ebit = revenue * ebit_margin;
        let nopat = ebit * (1.0 - settings.tax_rate);
        let capex = revenue * params.capex_pct_rev;
        let depreciation = capex * params.depreciation_pct_capex;
        let delta_nwc = delta_revenue * params.nwc_pct_rev_change;
        let fcf = nopat + depreciation - capex - delta_nwc;

        rows.push(ProjectionRow {
            year: seed.year + step as i32,
            revenue,
            ebit,
            nopat,
            delta_nwc,
            capex,
            depreciation,
            fcf,
        });
    }
    rows
}

/// Present value of an FCF path discounted at end of each period, together
/// with the last period's discount factor.
pub(crate) fn discount_explicit(fcf: &[f64], wacc: f64) -> (f64, f64) {
    let mut pv = 0.0;
    let mut factor = 1.0;
    for (idx, cash_flow) in fcf.iter().enumerate() {
        factor = (1.0 + wacc).powi(-(idx as i32 + 1));
        pv += cash_flow * factor;
    }
    (pv, factor)
}

/// Gordon growth value at the end of the explicit horizon. Caller ensures
/// `wacc > g`.
pub(crate) fn gordon_terminal_value(last_fcf: f64, wacc: f64, g: f64) -> f64 {
    last_fcf * (1.0 + g) / (wacc - g)
}

/// Discounts a projection into enterprise and equity value.
pub fn calculate_dcf(
    projections: Vec<ProjectionRow>,
    params: &ScenarioParams,
    net_debt: f64,
    scenario_name: &str,
    terminal_share_threshold: f64,
) -> Result<ValuationResult, ValidationError> {
    let wacc = params.wacc;
    let g = params.terminal_g;

    if g.is_nan() || wacc.is_nan() || g >= wacc {
        return Err(ValidationError::TerminalGrowthNotBelowDiscountRate {
            scenario: scenario_name.to_string(),
            wacc,
            terminal_g: g,
        });
    }
    let Some(last) = projections.last() else {
        return Err(ValidationError::EmptyProjection {
            scenario: scenario_name.to_string(),
        });
    };

    let fcf: Vec<f64> = projections.iter().map(|row| row.fcf).collect();
    let (pv_explicit, last_factor) = discount_explicit(&fcf, wacc);
    let terminal_value = gordon_terminal_value(last.fcf, wacc, g);
    let pv_terminal = terminal_value * last_factor;
    let enterprise_value = pv_explicit + pv_terminal;
    let equity_value = enterprise_value - net_debt;
    let terminal_share_pct = if enterprise_value == 0.0 {
        0.0
    } else {
        pv_terminal / enterprise_value
    };

    let terminal_share_warning = (terminal_share_pct > terminal_share_threshold).then(|| {
        Warning::new(
            scenario_name,
            WarningKind::TerminalShare,
            format!(
                "Terminal value accounts for {} of enterprise value (threshold {}). The valuation rests mostly on perpetuity assumptions.",
                fmt_pct(terminal_share_pct),
                fmt_pct(terminal_share_threshold)
            ),
        )
    });

    Ok(ValuationResult {
        scenario_name: scenario_name.to_string(),
        enterprise_value,
        equity_value,
        terminal_value,
        pv_explicit,
        pv_terminal,
        terminal_share_pct,
        wacc,
        terminal_g: g,
        assumptions: *params,
        projections,
        terminal_share_warning,
    })
}

/// Projects and values every scenario independently, in the order given.
///
/// A scenario that fails validation is recorded in `failures` and does not
/// affect the others.
pub fn run_scenarios(
    seed: ProjectionSeed,
    scenarios: &[NamedScenario],
    settings: &ValuationSettings,
) -> ScenarioRun {
    let mut run = ScenarioRun::default();

    for scenario in scenarios {
        let projections = project_financials(seed, &scenario.params, &settings.projection);
        match calculate_dcf(
            projections,
            &scenario.params,
            settings.net_debt,
            &scenario.name,
            settings.terminal_share_threshold,
        ) {
            Ok(result) => {
                debug!(
                    scenario = %scenario.name,
                    enterprise_value = result.enterprise_value,
                    "scenario valued"
                );
                run.results.push(result);
            }
            Err(error) => {
                warn!(scenario = %scenario.name, %error, "scenario valuation failed");
                run.failures.push(ScenarioFailure {
                    scenario: scenario.name.clone(),
                    error,
                });
            }
        }
    }
    run
}
