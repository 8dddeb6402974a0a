//! Tables a chart renderer consumes, and the one-line reading of each.

use std::collections::BTreeMap;

use serde::Serialize;

use super::types::{ScenarioRun, SensitivityGrid, ValuationResult, fmt_pct};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvCompositionRow {
    pub scenario: String,
    pub pv_explicit: f64,
    pub pv_terminal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FcfPoint {
    pub year: i32,
    pub fcf: f64,
    pub scenario: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeComponent {
    pub component: &'static str,
    pub value: f64,
    pub year: i32,
}

/// One point of a single-axis sweep; `ev` is `None` where not computable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisPoint {
    pub rate: f64,
    pub ev: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartData {
    pub ev_composition: Vec<EvCompositionRow>,
    pub fcf_projection: Vec<FcfPoint>,
    pub ebit_to_fcf_bridge: Vec<BridgeComponent>,
    pub ev_vs_wacc: Vec<AxisPoint>,
    pub ev_vs_terminal_g: Vec<AxisPoint>,
}

pub fn build_chart_data(
    run: &ScenarioRun,
    base_scenario: &str,
    grid: Option<&SensitivityGrid>,
) -> (ChartData, BTreeMap<String, String>) {
    let mut data = ChartData::default();
    let mut insights = BTreeMap::new();
    let base = run.get(base_scenario);

    data.ev_composition = run
        .results
        .iter()
        .map(|r| EvCompositionRow {
            scenario: r.scenario_name.clone(),
            pv_explicit: r.pv_explicit,
            pv_terminal: r.pv_terminal,
        })
        .collect();
    data.fcf_projection = run
        .results
        .iter()
        .flat_map(|r| {
            r.projections.iter().map(move |row| FcfPoint {
                year: row.year,
                fcf: row.fcf,
                scenario: r.scenario_name.clone(),
            })
        })
        .collect();

    if let Some(base) = base {
        insights.insert(
            "ev_composition".to_string(),
            format!(
                "Terminal value represents {} of enterprise value in the {} case.",
                fmt_pct(base.terminal_share_pct),
                base.scenario_name
            ),
        );
        if let Some(text) = fcf_cagr_insight(base) {
            insights.insert("fcf_projection".to_string(), text);
        }
        if let Some((bridge, text)) = ebit_to_fcf_bridge(base) {
            data.ebit_to_fcf_bridge = bridge;
            insights.insert("ebit_to_fcf_bridge".to_string(), text);
        }
    }

    if let Some(grid) = grid {
        let mid_g = grid.median_g_index();
        let mid_wacc = grid.median_wacc_index();
        data.ev_vs_wacc = (0..grid.wacc_values.len())
            .map(|i| AxisPoint {
                rate: grid.wacc_values[i],
                ev: grid.cell(i, mid_g),
            })
            .collect();
        data.ev_vs_terminal_g = (0..grid.terminal_g_values.len())
            .map(|j| AxisPoint {
                rate: grid.terminal_g_values[j],
                ev: grid.cell(mid_wacc, j),
            })
            .collect();

        if let Some(text) = sweep_insight(&data.ev_vs_wacc, "WACC") {
            insights.insert("sensitivity_wacc".to_string(), text);
        }
        if let Some(text) = sweep_insight(&data.ev_vs_terminal_g, "terminal growth") {
            insights.insert("sensitivity_g".to_string(), text);
        }
    }

    (data, insights)
}

fn fcf_cagr_insight(base: &ValuationResult) -> Option<String> {
    let (first, last) = (base.projections.first()?, base.projections.last()?);
    let periods = base.projections.len().checked_sub(1).filter(|&n| n > 0)?;
    if first.fcf <= 0.0 || last.fcf <= 0.0 {
        return None;
    }
    let cagr = (last.fcf / first.fcf).powf(1.0 / periods as f64) - 1.0;
    let direction = if cagr > 0.0 { "grows" } else { "declines" };
    Some(format!(
        "FCF {direction} at a CAGR of {} over the projection period ({} case).",
        fmt_pct(cagr),
        base.scenario_name
    ))
}

fn ebit_to_fcf_bridge(base: &ValuationResult) -> Option<(Vec<BridgeComponent>, String)> {
    let row = base.projections.first()?;
    let component = |component, value| BridgeComponent {
        component,
        value,
        year: row.year,
    };
    let bridge = vec![
        component("EBIT", row.ebit),
        component("Taxes", -(row.ebit - row.nopat)),
        component("Depreciation", row.depreciation),
        component("CAPEX", -row.capex),
        component("Delta NWC", -row.delta_nwc),
    ];
    let conversion = if row.ebit == 0.0 {
        0.0
    } else {
        row.fcf / row.ebit
    };
    let text = format!("Cash conversion ratio (FCF/EBIT) is {}.", fmt_pct(conversion));
    Some((bridge, text))
}

fn sweep_insight(points: &[AxisPoint], axis: &str) -> Option<String> {
    let (first, last) = (points.first()?, points.last()?);
    if points.len() < 2 {
        return None;
    }
    let (start, end) = (first.ev?, last.ev?);
    if start == 0.0 {
        return None;
    }
    let change = end / start - 1.0;
    let direction = if change < 0.0 { "decreases" } else { "increases" };
    Some(format!(
        "EV {direction} by {} as {axis} moves from {} to {}.",
        fmt_pct(change.abs()),
        fmt_pct(first.rate),
        fmt_pct(last.rate)
    ))
}
