use super::engine::{discount_explicit, gordon_terminal_value};
use super::error::ValidationError;
use super::types::{Driver, ProjectionRow, SensitivityGrid};

/// Grid value for a (wacc, g) pair that cannot be valued because wacc <= g.
pub const NOT_COMPUTABLE: f64 = 0.0;

const WACC_DRIVEN_RATIO: f64 = 1.2;
const GROWTH_DRIVEN_RATIO: f64 = 0.8;

/// Revalues one fixed FCF path over every (wacc, g) pair.
///
/// Only discounting and the terminal value vary per cell; the projection
/// is never re-run.
pub fn calculate_sensitivity_grid(
    base_projections: &[ProjectionRow],
    wacc_values: &[f64],
    terminal_g_values: &[f64],
) -> Result<SensitivityGrid, ValidationError> {
    if wacc_values.is_empty() {
        return Err(ValidationError::EmptyAxis { axis: "wacc" });
    }
    if terminal_g_values.is_empty() {
        return Err(ValidationError::EmptyAxis { axis: "terminal_g" });
    }
    let Some(last) = base_projections.last() else {
        return Err(ValidationError::EmptyCashFlowPath);
    };

    let fcf: Vec<f64> = base_projections.iter().map(|row| row.fcf).collect();
    let mut matrix = Vec::with_capacity(wacc_values.len());

    for &wacc in wacc_values {
        let (pv_explicit, last_factor) = discount_explicit(&fcf, wacc);
        let row = terminal_g_values
            .iter()
            .map(|&g| {
                if wacc <= g {
                    NOT_COMPUTABLE
                } else {
                    pv_explicit + gordon_terminal_value(last.fcf, wacc, g) * last_factor
                }
            })
            .collect::<Vec<_>>();
        matrix.push(row);
    }

    let mid_wacc = wacc_values.len() / 2;
    let mid_g = terminal_g_values.len() / 2;

    let wacc_impact = spread(matrix.iter().map(|row| row[mid_g]));
    let g_impact = spread(matrix[mid_wacc].iter().copied());

    let ev_min = matrix
        .iter()
        .flatten()
        .copied()
        .filter(|&ev| ev > 0.0)
        .reduce(f64::min)
        .unwrap_or(0.0);
    let ev_max = matrix
        .iter()
        .flatten()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let ev_base = matrix[mid_wacc][mid_g];

    Ok(SensitivityGrid {
        wacc_values: wacc_values.to_vec(),
        terminal_g_values: terminal_g_values.to_vec(),
        matrix,
        ev_min,
        ev_max,
        ev_base,
        wacc_impact,
        g_impact,
        driver: classify_driver(wacc_impact, g_impact),
    })
}

/// Ratio of the two impact ranges, +inf when growth has no impact.
pub fn classify_driver(wacc_impact: f64, g_impact: f64) -> Driver {
    let ratio = if g_impact > 0.0 {
        wacc_impact / g_impact
    } else {
        f64::INFINITY
    };

    if ratio > WACC_DRIVEN_RATIO {
        Driver::WaccDriven
    } else if ratio < GROWTH_DRIVEN_RATIO {
        Driver::GrowthDriven
    } else {
        Driver::Balanced
    }
}

fn spread(values: impl Iterator<Item = f64>) -> f64 {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if min.is_finite() && max.is_finite() {
        max - min
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::calculate_dcf;
    use crate::core::types::ScenarioParams;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn fcf_rows(fcf: &[f64]) -> Vec<ProjectionRow> {
        fcf.iter()
            .enumerate()
            .map(|(idx, &fcf)| ProjectionRow {
                year: 2024 + idx as i32,
                revenue: 0.0,
                ebit: 0.0,
                nopat: 0.0,
                delta_nwc: 0.0,
                capex: 0.0,
                depreciation: 0.0,
                fcf,
            })
            .collect()
    }

    fn params(wacc: f64, terminal_g: f64) -> ScenarioParams {
        ScenarioParams {
            revenue_growth: 0.05,
            ebit_margin: 0.2,
            wacc,
            terminal_g,
            capex_pct_rev: 0.1,
            depreciation_pct_capex: 0.8,
            nwc_pct_rev_change: 0.1,
        }
    }

    #[test]
    fn grid_cells_match_full_valuation() {
        let path = fcf_rows(&[100.0, 110.0, 120.0]);
        let waccs = [0.08, 0.10, 0.12];
        let gs = [0.01, 0.02, 0.03];
        let grid = calculate_sensitivity_grid(&path, &waccs, &gs).expect("valid grid");

        for (i, &wacc) in waccs.iter().enumerate() {
            for (j, &g) in gs.iter().enumerate() {
                let expected = calculate_dcf(path.clone(), &params(wacc, g), 0.0, "cell", 1.0)
                    .expect("valid valuation")
                    .enterprise_value;
                assert_approx(grid.matrix[i][j], expected);
            }
        }
        assert_approx(grid.ev_base, grid.matrix[1][1]);
    }

    #[test]
    fn cells_with_wacc_not_above_growth_are_not_computable() {
        let path = fcf_rows(&[100.0, 110.0]);
        let grid =
            calculate_sensitivity_grid(&path, &[0.02, 0.03, 0.10], &[0.02, 0.03]).expect("valid");

        assert_eq!(grid.matrix[0][0], NOT_COMPUTABLE);
        assert_eq!(grid.matrix[0][1], NOT_COMPUTABLE);
        assert_eq!(grid.matrix[1][1], NOT_COMPUTABLE);
        assert!(grid.matrix[1][0] > 0.0);
        assert_eq!(grid.cell(0, 0), None);
        assert!(grid.cell(2, 1).is_some());
    }

    #[test]
    fn ev_min_skips_sentinels_and_ev_max_is_unconditional() {
        let path = fcf_rows(&[100.0, 110.0]);
        let grid = calculate_sensitivity_grid(&path, &[0.02, 0.10], &[0.02]).expect("valid");
        assert_approx(grid.ev_min, grid.matrix[1][0]);
        assert_approx(grid.ev_max, grid.matrix[1][0]);

        let all_invalid = calculate_sensitivity_grid(&path, &[0.02], &[0.03]).expect("valid");
        assert_eq!(all_invalid.ev_min, 0.0);
        assert_eq!(all_invalid.ev_max, NOT_COMPUTABLE);
    }

    #[test]
    fn ev_max_includes_sentinel_when_every_valid_cell_is_negative() {
        let path = fcf_rows(&[-100.0, -50.0]);
        let grid = calculate_sensitivity_grid(&path, &[0.02, 0.10], &[0.02]).expect("valid");
        assert!(grid.matrix[1][0] < 0.0);
        assert_eq!(grid.ev_max, NOT_COMPUTABLE);
        assert_eq!(grid.ev_min, 0.0);
    }

    #[test]
    fn single_value_axes_produce_one_cell() {
        let path = fcf_rows(&[100.0]);
        let grid = calculate_sensitivity_grid(&path, &[0.10], &[0.02]).expect("valid");
        assert_eq!(grid.matrix.len(), 1);
        assert_eq!(grid.wacc_impact, 0.0);
        assert_eq!(grid.g_impact, 0.0);
        assert_eq!(grid.driver, Driver::WaccDriven);
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let path = fcf_rows(&[100.0]);
        assert_eq!(
            calculate_sensitivity_grid(&path, &[], &[0.02]),
            Err(ValidationError::EmptyAxis { axis: "wacc" })
        );
        assert_eq!(
            calculate_sensitivity_grid(&path, &[0.1], &[]),
            Err(ValidationError::EmptyAxis { axis: "terminal_g" })
        );
        assert_eq!(
            calculate_sensitivity_grid(&[], &[0.1], &[0.02]),
            Err(ValidationError::EmptyCashFlowPath)
        );
    }

    #[test]
    fn median_index_uses_upper_middle_for_even_axes() {
        let path = fcf_rows(&[100.0, 110.0]);
        let grid = calculate_sensitivity_grid(&path, &[0.08, 0.09, 0.10, 0.11], &[0.01, 0.02])
            .expect("valid");
        assert_eq!(grid.median_wacc_index(), 2);
        assert_eq!(grid.median_g_index(), 1);
        assert_approx(grid.ev_base, grid.matrix[2][1]);
    }

    #[test]
    fn driver_thresholds_are_applied() {
        assert_eq!(classify_driver(130.0, 100.0), Driver::WaccDriven);
        assert_eq!(classify_driver(70.0, 100.0), Driver::GrowthDriven);
        assert_eq!(classify_driver(100.0, 100.0), Driver::Balanced);
        assert_eq!(classify_driver(120.0, 100.0), Driver::Balanced);
        assert_eq!(classify_driver(80.0, 100.0), Driver::Balanced);
        assert_eq!(classify_driver(5.0, 0.0), Driver::WaccDriven);
    }

    #[test]
    fn swapping_impacts_flips_driver() {
        for (a, b) in [(300.0, 100.0), (150.0, 100.0), (1_000.0, 10.0)] {
            assert_eq!(classify_driver(a, b), Driver::WaccDriven);
            assert_eq!(classify_driver(b, a), Driver::GrowthDriven);
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_invalid_cells_are_exactly_the_sentinel(
            fcf in proptest::collection::vec(1i32..5_000, 1..8),
            waccs in proptest::collection::vec(0i32..2_000, 1..6),
            gs in proptest::collection::vec(-200i32..1_500, 1..6),
        ) {
            let path = fcf_rows(&fcf.into_iter().map(f64::from).collect::<Vec<_>>());
            let waccs: Vec<f64> = waccs.into_iter().map(|bp| bp as f64 / 10_000.0).collect();
            let gs: Vec<f64> = gs.into_iter().map(|bp| bp as f64 / 10_000.0).collect();
            let grid = calculate_sensitivity_grid(&path, &waccs, &gs).expect("valid grid");

            for (i, &wacc) in waccs.iter().enumerate() {
                for (j, &g) in gs.iter().enumerate() {
                    let value = grid.matrix[i][j];
                    if wacc <= g {
                        prop_assert!(value == NOT_COMPUTABLE);
                    } else {
                        prop_assert!(value.is_finite() && value > 0.0);
                    }
                }
            }
            prop_assert!(grid.ev_min <= grid.ev_max || grid.ev_min == 0.0);
        }
    }
}
