use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::core::insights::AxisPoint;
use crate::core::{ScenarioParams, SensitivityGrid, ValuationResult, Warning};
use crate::pipeline::{PipelineError, RunReport};

pub const SUMMARY_FILE: &str = "summary.json";
pub const PROJECTIONS_FILE: &str = "projections.csv";
pub const SENSITIVITY_FILE: &str = "sensitivity_ev.csv";
pub const EV_COMPOSITION_FILE: &str = "ev_composition.csv";
pub const FCF_PROJECTION_FILE: &str = "fcf_projection.csv";
pub const BRIDGE_FILE: &str = "ebit_to_fcf_bridge.csv";
pub const EV_VS_WACC_FILE: &str = "ev_vs_wacc.csv";
pub const EV_VS_TERMINAL_G_FILE: &str = "ev_vs_terminal_g.csv";
pub const RUN_LOG_FILE: &str = "run_log.txt";

/// Every artifact a run may write, apart from the log.
pub const EXPORT_FILES: &[&str] = &[
    SUMMARY_FILE,
    PROJECTIONS_FILE,
    SENSITIVITY_FILE,
    EV_COMPOSITION_FILE,
    FCF_PROJECTION_FILE,
    BRIDGE_FILE,
    EV_VS_WACC_FILE,
    EV_VS_TERMINAL_G_FILE,
];

/// Cell text for grid entries that cannot be valued.
pub const NOT_AVAILABLE: &str = "N/A";

/// The `summary.json` document. Borrowed from a [`RunReport`] so the HTTP
/// layer can return the same shape without writing anything.
#[derive(Debug, Serialize)]
pub struct Summary<'a> {
    company: &'a str,
    currency: &'a str,
    scenarios: ScenarioMap<'a>,
    failed_scenarios: Vec<FailedScenario<'a>>,
    sensitivity_analysis: Option<SensitivitySummary<'a>>,
    consistency_warnings: &'a [Warning],
    insights: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a RunReport> for Summary<'a> {
    fn from(report: &'a RunReport) -> Self {
        Self {
            company: &report.company,
            currency: &report.currency,
            scenarios: ScenarioMap(&report.run.results),
            failed_scenarios: report
                .run
                .failures
                .iter()
                .map(|f| FailedScenario {
                    scenario: &f.scenario,
                    error: f.error.to_string(),
                })
                .collect(),
            sensitivity_analysis: report.sensitivity.as_ref().map(|grid| SensitivitySummary {
                base_scenario: &report.base_scenario,
                grid,
            }),
            consistency_warnings: &report.warnings,
            insights: &report.insights,
        }
    }
}

/// Scenario name to headline figures, in configuration order.
#[derive(Debug)]
struct ScenarioMap<'a>(&'a [ValuationResult]);

impl Serialize for ScenarioMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for result in self.0 {
            map.serialize_entry(&result.scenario_name, &ScenarioSummary::from(result))?;
        }
        map.end()
    }
}

#[derive(Debug, Serialize)]
struct ScenarioSummary<'a> {
    enterprise_value: f64,
    equity_value: f64,
    terminal_value: f64,
    pv_explicit: f64,
    pv_terminal: f64,
    wacc: f64,
    terminal_g: f64,
    terminal_share_pct: f64,
    assumptions: &'a ScenarioParams,
}

impl<'a> From<&'a ValuationResult> for ScenarioSummary<'a> {
    fn from(result: &'a ValuationResult) -> Self {
        Self {
            enterprise_value: result.enterprise_value,
            equity_value: result.equity_value,
            terminal_value: result.terminal_value,
            pv_explicit: result.pv_explicit,
            pv_terminal: result.pv_terminal,
            wacc: result.wacc,
            terminal_g: result.terminal_g,
            terminal_share_pct: result.terminal_share_pct,
            assumptions: &result.assumptions,
        }
    }
}

#[derive(Debug, Serialize)]
struct FailedScenario<'a> {
    scenario: &'a str,
    error: String,
}

#[derive(Debug)]
struct SensitivitySummary<'a> {
    base_scenario: &'a str,
    grid: &'a SensitivityGrid,
}

impl Serialize for SensitivitySummary<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let grid = self.grid;
        let mut map = serializer.serialize_map(Some(10))?;
        map.serialize_entry("base_scenario", self.base_scenario)?;
        map.serialize_entry("wacc_values", &grid.wacc_values)?;
        map.serialize_entry("terminal_g_values", &grid.terminal_g_values)?;
        map.serialize_entry("ev_min", &grid.ev_min)?;
        map.serialize_entry("ev_max", &grid.ev_max)?;
        map.serialize_entry("ev_base", &grid.ev_base)?;
        map.serialize_entry("wacc_impact_range", &grid.wacc_impact)?;
        map.serialize_entry("g_impact_range", &grid.g_impact)?;
        map.serialize_entry("driver", &grid.driver)?;
        map.serialize_entry("driver_analysis", grid.driver.analysis())?;
        map.end()
    }
}

/// One `projections.csv` line.
#[derive(Debug, Serialize)]
struct ProjectionLine<'a> {
    year: i32,
    revenue: f64,
    ebit: f64,
    nopat: f64,
    delta_nwc: f64,
    capex: f64,
    depreciation: f64,
    fcf: f64,
    scenario: &'a str,
}

/// Writes every artifact of `report` into `output_dir`, creating it if
/// needed. Chart tables with no rows are not written.
pub fn write_outputs(report: &RunReport, output_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    fs::create_dir_all(output_dir).map_err(|source| PipelineError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;
    let mut written = Vec::new();

    let path = output_dir.join(SUMMARY_FILE);
    write_summary(&Summary::from(report), &path)?;
    written.push(path);

    let path = output_dir.join(PROJECTIONS_FILE);
    write_csv(&path, |writer| {
        for result in &report.run.results {
            for row in &result.projections {
                writer.serialize(ProjectionLine {
                    year: row.year,
                    revenue: row.revenue,
                    ebit: row.ebit,
                    nopat: row.nopat,
                    delta_nwc: row.delta_nwc,
                    capex: row.capex,
                    depreciation: row.depreciation,
                    fcf: row.fcf,
                    scenario: &result.scenario_name,
                })?;
            }
        }
        Ok(())
    })?;
    written.push(path);

    if let Some(grid) = &report.sensitivity {
        let path = output_dir.join(SENSITIVITY_FILE);
        write_csv(&path, |writer| write_grid(writer, grid))?;
        written.push(path);
    }

    let charts = &report.charts;
    if !charts.ev_composition.is_empty() {
        let path = output_dir.join(EV_COMPOSITION_FILE);
        write_csv(&path, |writer| serialize_all(writer, &charts.ev_composition))?;
        written.push(path);
    }
    if !charts.fcf_projection.is_empty() {
        let path = output_dir.join(FCF_PROJECTION_FILE);
        write_csv(&path, |writer| serialize_all(writer, &charts.fcf_projection))?;
        written.push(path);
    }
    if !charts.ebit_to_fcf_bridge.is_empty() {
        let path = output_dir.join(BRIDGE_FILE);
        write_csv(&path, |writer| serialize_all(writer, &charts.ebit_to_fcf_bridge))?;
        written.push(path);
    }
    for (file, axis, points) in [
        (EV_VS_WACC_FILE, "wacc", &charts.ev_vs_wacc),
        (EV_VS_TERMINAL_G_FILE, "terminal_g", &charts.ev_vs_terminal_g),
    ] {
        if points.is_empty() {
            continue;
        }
        let path = output_dir.join(file);
        write_csv(&path, |writer| write_sweep(writer, axis, points))?;
        written.push(path);
    }

    Ok(written)
}

fn write_summary(summary: &Summary<'_>, path: &Path) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(summary).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_csv<F>(path: &Path, fill: F) -> Result<(), PipelineError>
where
    F: FnOnce(&mut csv::Writer<File>) -> csv::Result<()>,
{
    let csv_error = |source| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    fill(&mut writer).map_err(csv_error)?;
    writer.flush().map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn serialize_all<T: Serialize>(writer: &mut csv::Writer<File>, rows: &[T]) -> csv::Result<()> {
    rows.iter().try_for_each(|row| writer.serialize(row))
}

/// Header `wacc,<g1>,<g2>,...`; one line per discount rate.
fn write_grid(writer: &mut csv::Writer<File>, grid: &SensitivityGrid) -> csv::Result<()> {
    let mut header = vec!["wacc".to_string()];
    header.extend(grid.terminal_g_values.iter().map(f64::to_string));
    writer.write_record(&header)?;

    for (i, wacc) in grid.wacc_values.iter().enumerate() {
        let mut record = vec![wacc.to_string()];
        record.extend((0..grid.terminal_g_values.len()).map(|j| cell_text(grid.cell(i, j))));
        writer.write_record(&record)?;
    }
    Ok(())
}

fn write_sweep(writer: &mut csv::Writer<File>, axis: &str, points: &[AxisPoint]) -> csv::Result<()> {
    writer.write_record([axis, "ev"])?;
    for point in points {
        writer.write_record([point.rate.to_string(), cell_text(point.ev)])?;
    }
    Ok(())
}

fn cell_text(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |ev| ev.to_string())
}
