//! Run configuration.
//!
//! Loaded once from a TOML file (or taken from the built-in defaults),
//! validated, then passed by reference to every stage.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::core::{
    MarginBasis, NamedScenario, ProjectionSettings, ScenarioParams, ValuationSettings,
};

/// Longest explicit horizon accepted.
pub const MAX_YEARS_FORECAST: u32 = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// File names of the three statements inside the data directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputFiles {
    pub income_statement: String,
    pub balance_sheet: String,
    pub cash_flow: String,
}

impl Default for InputFiles {
    fn default() -> Self {
        Self {
            income_statement: "income_statement.csv".to_string(),
            balance_sheet: "balance_sheet.csv".to_string(),
            cash_flow: "cash_flow.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensitivityAxes {
    pub wacc_values: Vec<f64>,
    pub terminal_g_values: Vec<f64>,
}

impl Default for SensitivityAxes {
    fn default() -> Self {
        Self {
            wacc_values: vec![0.08, 0.09, 0.10, 0.11, 0.12, 0.13, 0.14],
            terminal_g_values: vec![0.01, 0.02, 0.03, 0.04, 0.05],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValuationConfig {
    pub company_name: String,
    pub currency: String,
    pub years_forecast: u32,
    /// Flat rate applied to EBIT, historical and projected alike.
    pub tax_rate: f64,
    pub net_debt: f64,
    pub terminal_share_warning_threshold: f64,
    pub margin_basis: MarginBasis,
    /// Scenario whose projection feeds the sensitivity grid.
    pub base_scenario: String,
    pub files: InputFiles,
    pub scenarios: Vec<NamedScenario>,
    pub sensitivity: SensitivityAxes,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            company_name: "Ambev".to_string(),
            currency: "BRL".to_string(),
            years_forecast: 5,
            tax_rate: 0.34,
            net_debt: 0.0,
            terminal_share_warning_threshold: 0.75,
            margin_basis: MarginBasis::Scenario,
            base_scenario: "base".to_string(),
            files: InputFiles::default(),
            scenarios: default_scenarios(),
            sensitivity: SensitivityAxes::default(),
        }
    }
}

fn default_scenarios() -> Vec<NamedScenario> {
    let scenario = |name: &str, params: ScenarioParams| NamedScenario {
        name: name.to_string(),
        params,
    };
    vec![
        scenario(
            "base",
            ScenarioParams {
                revenue_growth: 0.05,
                ebit_margin: 0.20,
                wacc: 0.11,
                terminal_g: 0.03,
                capex_pct_rev: 0.15,
                depreciation_pct_capex: 0.80,
                nwc_pct_rev_change: 0.10,
            },
        ),
        scenario(
            "downside",
            ScenarioParams {
                revenue_growth: 0.02,
                ebit_margin: 0.17,
                wacc: 0.13,
                terminal_g: 0.01,
                capex_pct_rev: 0.12,
                depreciation_pct_capex: 0.80,
                nwc_pct_rev_change: 0.15,
            },
        ),
        scenario(
            "upside",
            ScenarioParams {
                revenue_growth: 0.08,
                ebit_margin: 0.23,
                wacc: 0.09,
                terminal_g: 0.04,
                capex_pct_rev: 0.18,
                depreciation_pct_capex: 0.80,
                nwc_pct_rev_change: 0.08,
            },
        ),
    ]
}

impl ValuationConfig {
    /// Built-in defaults when `path` is `None`, otherwise the parsed file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ValuationConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that can be checked before any data is seen.
    ///
    /// `terminal_g >= wacc` is not rejected here: it fails only the
    /// scenario that carries it, at valuation time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_YEARS_FORECAST).contains(&self.years_forecast) {
            return Err(invalid(&format!(
                "years_forecast must be between 1 and {MAX_YEARS_FORECAST}"
            )));
        }
        if !(0.0..1.0).contains(&self.tax_rate) {
            return Err(invalid("tax_rate must be in [0, 1)"));
        }
        if !self.net_debt.is_finite() {
            return Err(invalid("net_debt must be finite"));
        }
        if !self.terminal_share_warning_threshold.is_finite() {
            return Err(invalid("terminal_share_warning_threshold must be finite"));
        }
        if self.scenarios.is_empty() {
            return Err(invalid("at least one scenario is required"));
        }

        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            if scenario.name.trim().is_empty() {
                return Err(invalid("scenario names must not be empty"));
            }
            if !seen.insert(scenario.name.as_str()) {
                return Err(invalid(&format!(
                    "duplicate scenario name `{}`",
                    scenario.name
                )));
            }
            validate_params(&scenario.name, &scenario.params)?;
        }

        for (axis, values) in [
            ("wacc_values", &self.sensitivity.wacc_values),
            ("terminal_g_values", &self.sensitivity.terminal_g_values),
        ] {
            if values.is_empty() {
                return Err(invalid(&format!("sensitivity.{axis} must not be empty")));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(invalid(&format!("sensitivity.{axis} must be finite")));
            }
        }
        if self.sensitivity.wacc_values.iter().any(|&w| w <= -1.0) {
            return Err(invalid("sensitivity.wacc_values must be > -100%"));
        }
        Ok(())
    }

    pub fn valuation_settings(&self) -> ValuationSettings {
        ValuationSettings {
            projection: ProjectionSettings {
                years_forecast: self.years_forecast,
                tax_rate: self.tax_rate,
                margin_basis: self.margin_basis,
            },
            net_debt: self.net_debt,
            terminal_share_threshold: self.terminal_share_warning_threshold,
        }
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioParams> {
        self.scenarios
            .iter()
            .find(|s| s.name == name)
            .map(|s| &s.params)
    }
}

fn validate_params(name: &str, params: &ScenarioParams) -> Result<(), ConfigError> {
    let fields = [
        ("revenue_growth", params.revenue_growth),
        ("ebit_margin", params.ebit_margin),
        ("wacc", params.wacc),
        ("terminal_g", params.terminal_g),
        ("capex_pct_rev", params.capex_pct_rev),
        ("depreciation_pct_capex", params.depreciation_pct_capex),
        ("nwc_pct_rev_change", params.nwc_pct_rev_change),
    ];
    if let Some((field, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
        return Err(invalid(&format!("scenario `{name}`: {field} must be finite")));
    }
    for (field, value) in [
        ("revenue_growth", params.revenue_growth),
        ("wacc", params.wacc),
        ("terminal_g", params.terminal_g),
    ] {
        if value <= -1.0 {
            return Err(invalid(&format!("scenario `{name}`: {field} must be > -100%")));
        }
    }
    Ok(())
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}
