use std::collections::HashMap;

use super::error::DataError;
use super::types::{
    BalanceSheetRow, CashFlowRow, HistoricalRecord, IncomeStatementRow, RawFinancials,
    StatementRow,
};

/// Rejects a statement whose years are unsorted or duplicated, or which
/// carries a non-finite number.
pub fn validate_statement<R: StatementRow>(rows: &[R]) -> Result<(), DataError> {
    if rows.is_empty() {
        return Err(DataError::EmptyTable {
            table: R::TABLE.to_string(),
        });
    }

    let mut previous: Option<i32> = None;
    for row in rows {
        let year = row.year();
        if let Some(prev) = previous {
            if year < prev {
                return Err(DataError::UnsortedYears {
                    table: R::TABLE.to_string(),
                });
            }
            if year == prev {
                return Err(DataError::DuplicateYear {
                    table: R::TABLE.to_string(),
                    year,
                });
            }
        }
        previous = Some(year);

        if let Some((column, _)) = row.values().into_iter().find(|(_, v)| !v.is_finite()) {
            return Err(DataError::MissingValue {
                table: R::TABLE.to_string(),
                year,
                column: column.to_string(),
            });
        }
    }
    Ok(())
}

pub fn validate_financials(raw: &RawFinancials) -> Result<(), DataError> {
    validate_statement(&raw.income_statement)?;
    validate_statement(&raw.balance_sheet)?;
    validate_statement(&raw.cash_flow)?;
    Ok(())
}

/// Inner-joins the three statements on year and derives NWC, EBIT, NOPAT
/// and FCF for every common year, ascending.
///
/// NOPAT uses the flat `tax_rate`, not the taxes actually booked. Capex
/// enters FCF as an absolute outflow whatever its recorded sign, and the
/// first year's NWC change is zero.
pub fn calculate_historical_metrics(
    raw: &RawFinancials,
    tax_rate: f64,
) -> Result<Vec<HistoricalRecord>, DataError> {
    validate_financials(raw)?;

    let balance_by_year: HashMap<i32, &BalanceSheetRow> =
        raw.balance_sheet.iter().map(|r| (r.year, r)).collect();
    let cash_flow_by_year: HashMap<i32, &CashFlowRow> =
        raw.cash_flow.iter().map(|r| (r.year, r)).collect();

    let mut records = Vec::with_capacity(raw.income_statement.len());
    let mut previous_nwc: Option<f64> = None;

    for income in &raw.income_statement {
        let (Some(balance), Some(cash_flow)) = (
            balance_by_year.get(&income.year),
            cash_flow_by_year.get(&income.year),
        ) else {
            continue;
        };

        let record = merge_year(income, balance, cash_flow, previous_nwc, tax_rate);
        previous_nwc = Some(record.nwc);
        records.push(record);
    }

    if records.is_empty() {
        return Err(DataError::NoCommonYears);
    }
    Ok(records)
}

fn merge_year(
    income: &IncomeStatementRow,
    balance: &BalanceSheetRow,
    cash_flow: &CashFlowRow,
    previous_nwc: Option<f64>,
    tax_rate: f64,
) -> HistoricalRecord {
    let nwc = balance.receivables + balance.inventory - balance.payables;
    let delta_nwc = previous_nwc.map_or(0.0, |prev| nwc - prev);
    let ebit = income.revenue - income.cogs - income.opex - income.depreciation;
    let nopat = ebit * (1.0 - tax_rate);
    let fcf = nopat + income.depreciation - cash_flow.capex.abs() - delta_nwc;

    HistoricalRecord {
        year: income.year,
        revenue: income.revenue,
        cogs: income.cogs,
        opex: income.opex,
        depreciation: income.depreciation,
        interest_expense: income.interest_expense,
        taxes: income.taxes,
        cash: balance.cash,
        receivables: balance.receivables,
        inventory: balance.inventory,
        payables: balance.payables,
        debt_short: balance.debt_short,
        debt_long: balance.debt_long,
        equity: balance.equity,
        cfo: cash_flow.cfo,
        capex: cash_flow.capex,
        cfi_other: cash_flow.cfi_other,
        cff_other: cash_flow.cff_other,
        nwc,
        delta_nwc,
        ebit,
        nopat,
        fcf,
    }
}
