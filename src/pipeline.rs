//! Batch orchestration: load, value, check, export.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, ValuationConfig};
use crate::core::insights::{ChartData, build_chart_data};
use crate::core::{
    DataError, HistoricalRecord, ProjectionSeed, RawFinancials, ScenarioRun, SensitivityGrid,
    Warning, calculate_historical_metrics, calculate_sensitivity_grid,
    check_projection_consistency, run_scenarios,
};
use crate::io::{load_financials, write_outputs};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error on {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("could not serialize {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything one run produced, before anything is written.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub company: String,
    pub currency: String,
    pub base_scenario: String,
    pub history: Vec<HistoricalRecord>,
    pub run: ScenarioRun,
    /// Terminal-share and consistency warnings, scenario by scenario.
    pub warnings: Vec<Warning>,
    pub sensitivity: Option<SensitivityGrid>,
    pub charts: ChartData,
    pub insights: BTreeMap<String, String>,
}

/// Values already-loaded statements. No file system access.
pub fn evaluate(config: &ValuationConfig, raw: &RawFinancials) -> Result<RunReport, DataError> {
    let history = calculate_historical_metrics(raw, config.tax_rate)?;
    let Some(last) = history.last() else {
        return Err(DataError::NoCommonYears);
    };
    info!(
        years = history.len(),
        first = history[0].year,
        last = last.year,
        "historical metrics derived"
    );

    let run = run_scenarios(
        ProjectionSeed::from(last),
        &config.scenarios,
        &config.valuation_settings(),
    );
    info!(
        valued = run.results.len(),
        failed = run.failures.len(),
        "scenarios valued"
    );

    let mut warnings = Vec::new();
    for result in &run.results {
        warnings.extend(result.terminal_share_warning.clone());
        warnings.extend(check_projection_consistency(
            &history,
            &result.projections,
            &result.scenario_name,
            result.terminal_g,
        ));
    }
    for warning in &warnings {
        warn!("{warning}");
    }

    let sensitivity = sensitivity_for_base(config, &run);
    let (charts, insights) = build_chart_data(&run, &config.base_scenario, sensitivity.as_ref());

    Ok(RunReport {
        company: config.company_name.clone(),
        currency: config.currency.clone(),
        base_scenario: config.base_scenario.clone(),
        history,
        run,
        warnings,
        sensitivity,
        charts,
        insights,
    })
}

fn sensitivity_for_base(config: &ValuationConfig, run: &ScenarioRun) -> Option<SensitivityGrid> {
    let base = &config.base_scenario;
    let Some(result) = run.get(base) else {
        match run.failure(base) {
            Some(failure) => warn!(
                scenario = %base,
                error = %failure.error,
                "base scenario failed; sensitivity analysis skipped"
            ),
            None => warn!(scenario = %base, "base scenario not configured; sensitivity analysis skipped"),
        }
        return None;
    };

    match calculate_sensitivity_grid(
        &result.projections,
        &config.sensitivity.wacc_values,
        &config.sensitivity.terminal_g_values,
    ) {
        Ok(grid) => {
            info!(
                cells = grid.wacc_values.len() * grid.terminal_g_values.len(),
                driver = grid.driver.label(),
                "sensitivity grid computed"
            );
            Some(grid)
        }
        Err(error) => {
            warn!(%error, "sensitivity analysis skipped");
            None
        }
    }
}

/// Full batch run: reads the statements from `data_dir`, values every
/// scenario and writes all artifacts into `output_dir`.
pub fn run_pipeline(
    config: &ValuationConfig,
    data_dir: &Path,
    output_dir: &Path,
) -> Result<RunReport, PipelineError> {
    info!(
        company = %config.company_name,
        data_dir = %data_dir.display(),
        "starting valuation run"
    );
    let raw = load_financials(data_dir, &config.files)?;
    let report = evaluate(config, &raw)?;

    let written = write_outputs(&report, output_dir)?;
    info!(
        files = written.len(),
        output_dir = %output_dir.display(),
        "outputs written"
    );

    log_summary(&report);
    Ok(report)
}

fn log_summary(report: &RunReport) {
    for result in &report.run.results {
        info!(
            scenario = %result.scenario_name,
            enterprise_value = result.enterprise_value,
            equity_value = result.equity_value,
            terminal_share_pct = result.terminal_share_pct,
            "valuation"
        );
    }
    for failure in &report.run.failures {
        warn!(scenario = %failure.scenario, error = %failure.error, "scenario failed");
    }
    if let Some(grid) = &report.sensitivity {
        info!(
            ev_min = grid.ev_min,
            ev_max = grid.ev_max,
            driver = grid.driver.label(),
            "{}",
            grid.driver.analysis()
        );
    }
    info!(
        warnings = report.warnings.len(),
        currency = %report.currency,
        "run complete"
    );
}
