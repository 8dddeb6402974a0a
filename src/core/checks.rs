use super::types::{
    HistoricalRecord, ProjectionRow, Warning, WarningKind, fmt_amount, fmt_pct,
};

const MAX_MARGIN_DRIFT: f64 = 0.10;
const MAX_CAPEX_TO_DEPRECIATION: f64 = 1.5;

/// Flags economically implausible projections. Each check runs on its own
/// and none of them blocks a valuation.
pub fn check_projection_consistency(
    history: &[HistoricalRecord],
    projections: &[ProjectionRow],
    scenario_name: &str,
    terminal_g: f64,
) -> Vec<Warning> {
    let mut warnings = Vec::new();

    let historical_margin = mean_margin(history.iter().map(|r| (r.ebit, r.revenue)));
    let projected_margin = mean_margin(projections.iter().map(|r| (r.ebit, r.revenue)));
    if let (Some(hist), Some(proj)) = (historical_margin, projected_margin) {
        if (proj - hist).abs() > MAX_MARGIN_DRIFT {
            warnings.push(Warning::new(
                scenario_name,
                WarningKind::MarginDrift,
                format!(
                    "Projected EBIT margin ({}) diverges significantly from historical avg ({}). Ensure this structural change is justified.",
                    fmt_pct(proj),
                    fmt_pct(hist)
                ),
            ));
        }
    }

    if let Some(growth) = last_year_growth(history, projections) {
        if growth > terminal_g {
            warnings.push(Warning::new(
                scenario_name,
                WarningKind::MissingFade,
                format!(
                    "Last year revenue growth ({}) is higher than terminal growth ({}). This implies a potentially aggressive terminal value assumption.",
                    fmt_pct(growth),
                    fmt_pct(terminal_g)
                ),
            ));
        }
    }

    if let Some(last) = projections.last() {
        if last.capex > last.depreciation * MAX_CAPEX_TO_DEPRECIATION {
            warnings.push(Warning::new(
                scenario_name,
                WarningKind::ReinvestmentGap,
                format!(
                    "Terminal year CAPEX ({}) is significantly higher than depreciation ({}). This implies high growth reinvestment in perpetuity.",
                    fmt_amount(last.capex),
                    fmt_amount(last.depreciation)
                ),
            ));
        }
    }

    warnings
}

/// Mean of EBIT / revenue over years with non-zero revenue.
fn mean_margin(rows: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let (sum, count) = rows
        .filter(|&(_, revenue)| revenue != 0.0)
        .fold((0.0, 0usize), |(sum, count), (ebit, revenue)| {
            (sum + ebit / revenue, count + 1)
        });
    (count > 0).then(|| sum / count as f64)
}

/// Growth into the final projected year. A one-year projection grows from
/// the last historical year.
fn last_year_growth(history: &[HistoricalRecord], projections: &[ProjectionRow]) -> Option<f64> {
    let last = projections.last()?;
    let previous = match projections.len() {
        0 => return None,
        1 => history.last()?.revenue,
        n => projections[n - 2].revenue,
    };
    (previous != 0.0).then(|| last.revenue / previous - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::{calculate_historical_metrics, fixtures::sample_financials};

    fn history() -> Vec<HistoricalRecord> {
        calculate_historical_metrics(&sample_financials(), 0.34).expect("valid fixture")
    }

    fn row(year: i32, revenue: f64, ebit: f64, capex: f64, depreciation: f64) -> ProjectionRow {
        ProjectionRow {
            year,
            revenue,
            ebit,
            nopat: 0.0,
            delta_nwc: 0.0,
            capex,
            depreciation,
            fcf: 0.0,
        }
    }

    fn kinds(warnings: &[Warning]) -> Vec<WarningKind> {
        warnings.iter().map(|w| w.kind).collect()
    }

    #[test]
    fn steady_projection_raises_nothing() {
        // Historical margin is 30%; growth fades to 1.5%; capex ~ depreciation.
        let projections = vec![
            row(2024, 1_300.0, 390.0, 100.0, 90.0),
            row(2025, 1_319.5, 395.85, 100.0, 90.0),
        ];
        let warnings = check_projection_consistency(&history(), &projections, "base", 0.02);
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn margin_drift_over_ten_points_is_flagged() {
        let projections = vec![
            row(2024, 1_300.0, 200.0, 100.0, 90.0),
            row(2025, 1_319.5, 203.0, 100.0, 90.0),
        ];
        let warnings = check_projection_consistency(&history(), &projections, "base", 0.02);
        assert_eq!(kinds(&warnings), vec![WarningKind::MarginDrift]);
        assert!(warnings[0].to_string().starts_with("[base] Projected EBIT margin (15.4%)"));
        assert!(warnings[0].message.contains("historical avg (30.0%)"));
    }

    #[test]
    fn growth_above_terminal_rate_is_flagged() {
        let projections = vec![
            row(2024, 1_300.0, 390.0, 100.0, 90.0),
            row(2025, 1_365.0, 409.5, 100.0, 90.0),
        ];
        let warnings = check_projection_consistency(&history(), &projections, "upside", 0.03);
        assert_eq!(kinds(&warnings), vec![WarningKind::MissingFade]);
        assert!(warnings[0].message.contains("(5.0%)"));
    }

    #[test]
    fn one_year_projection_grows_from_last_historical_revenue() {
        // Last historical revenue is 1210.
        let projections = vec![row(2024, 1_331.0, 399.3, 100.0, 90.0)];
        let warnings = check_projection_consistency(&history(), &projections, "base", 0.03);
        assert_eq!(kinds(&warnings), vec![WarningKind::MissingFade]);
        assert!(warnings[0].message.contains("(10.0%)"));
    }

    #[test]
    fn capex_far_above_depreciation_is_flagged() {
        let projections = vec![
            row(2024, 1_300.0, 390.0, 150.0, 100.0),
            row(2025, 1_319.5, 395.85, 151.0, 100.0),
        ];
        let warnings = check_projection_consistency(&history(), &projections, "base", 0.02);
        assert_eq!(kinds(&warnings), vec![WarningKind::ReinvestmentGap]);
        assert!(warnings[0].message.contains("CAPEX (151)"));
    }

    #[test]
    fn all_checks_fire_independently_in_order() {
        let projections = vec![
            row(2024, 1_300.0, 65.0, 200.0, 100.0),
            row(2025, 1_430.0, 71.5, 200.0, 100.0),
        ];
        let warnings = check_projection_consistency(&history(), &projections, "stress", 0.02);
        assert_eq!(
            kinds(&warnings),
            vec![
                WarningKind::MarginDrift,
                WarningKind::MissingFade,
                WarningKind::ReinvestmentGap
            ]
        );
        assert!(warnings.iter().all(|w| w.scenario == "stress"));
    }

    #[test]
    fn zero_revenue_disables_margin_and_growth_checks() {
        let projections = vec![row(2024, 0.0, 0.0, 0.0, 0.0), row(2025, 0.0, 0.0, 0.0, 0.0)];
        let warnings = check_projection_consistency(&history(), &projections, "base", 0.02);
        assert!(warnings.is_empty());
    }
}
