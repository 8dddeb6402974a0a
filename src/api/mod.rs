use axum::{
    Router,
    extract::{Json, Query, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{ConfigError, SensitivityAxes, ValuationConfig};
use crate::core::{
    BalanceSheetRow, CashFlowRow, IncomeStatementRow, MarginBasis, NamedScenario, RawFinancials,
};
use crate::io::export::NOT_AVAILABLE;
use crate::io::{PROJECTIONS_FILE, SENSITIVITY_FILE, SUMMARY_FILE, Summary};
use crate::pipeline::evaluate;

const INDEX_HTML: &str = include_str!("../../web/index.html");
const STYLES_CSS: &str = include_str!("../../web/styles.css");
const APP_JS: &str = include_str!("../../web/app.js");

const OUTPUTS_MISSING: &str = "Outputs not found. Run the pipeline first (dcf-valuation run).";

/// Shared by every handler: where the batch run wrote its artifacts and
/// the configuration on-demand valuations start from.
#[derive(Debug, Clone)]
pub struct AppState {
    output_dir: PathBuf,
    config: Arc<ValuationConfig>,
}

impl AppState {
    pub fn new(output_dir: PathBuf, config: ValuationConfig) -> Self {
        Self {
            output_dir,
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProjectionsQuery {
    scenario: Option<String>,
}

/// One line of `projections.csv` as read back.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
struct ProjectionRecord {
    year: i32,
    revenue: f64,
    ebit: f64,
    nopat: f64,
    delta_nwc: f64,
    capex: f64,
    depreciation: f64,
    fcf: f64,
    scenario: String,
}

#[derive(Debug, Serialize)]
struct ProjectionsResponse {
    scenario: String,
    rows: Vec<ProjectionRecord>,
}

#[derive(Debug, PartialEq, Serialize)]
struct SensitivityRow {
    wacc: f64,
    /// `None` where the discount rate does not exceed growth.
    ev: Vec<Option<f64>>,
}

#[derive(Debug, PartialEq, Serialize)]
struct SensitivityResponse {
    terminal_g_values: Vec<f64>,
    rows: Vec<SensitivityRow>,
}

/// Raw statements plus optional overrides of the server's configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ValuatePayload {
    income_statement: Vec<IncomeStatementRow>,
    balance_sheet: Vec<BalanceSheetRow>,
    cash_flow: Vec<CashFlowRow>,
    company_name: Option<String>,
    currency: Option<String>,
    years_forecast: Option<u32>,
    tax_rate: Option<f64>,
    net_debt: Option<f64>,
    terminal_share_warning_threshold: Option<f64>,
    margin_basis: Option<MarginBasis>,
    base_scenario: Option<String>,
    scenarios: Option<Vec<NamedScenario>>,
    sensitivity: Option<SensitivityAxes>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
enum ArtifactError {
    Missing,
    Unreadable(String),
}

impl IntoResponse for ArtifactError {
    fn into_response(self) -> Response {
        match self {
            ArtifactError::Missing => error_response(StatusCode::NOT_FOUND, OUTPUTS_MISSING),
            ArtifactError::Unreadable(msg) => {
                warn!(error = %msg, "could not read output artifact");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &msg)
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/styles.css", get(styles_handler))
        .route("/app.js", get(app_js_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/projections", get(projections_handler))
        .route("/api/sensitivity", get(sensitivity_handler))
        .route("/api/valuate", post(valuate_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16, state: AppState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let output_dir = state.output_dir.clone();
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        output_dir = %output_dir.display(),
        "DCF dashboard listening on http://127.0.0.1:{port}/"
    );

    axum::serve(listener, app).await
}

async fn index_handler() -> impl IntoResponse {
    with_cache_control(Html(INDEX_HTML))
}

async fn styles_handler() -> impl IntoResponse {
    with_cache_control((
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        STYLES_CSS,
    ))
}

async fn app_js_handler() -> impl IntoResponse {
    with_cache_control((
        [(
            header::CONTENT_TYPE,
            "application/javascript; charset=utf-8",
        )],
        APP_JS,
    ))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn summary_handler(State(state): State<AppState>) -> Response {
    let summary = read_artifact(&state.output_dir.join(SUMMARY_FILE)).and_then(|text| {
        serde_json::from_str::<serde_json::Value>(&text)
            .map_err(|e| ArtifactError::Unreadable(format!("{SUMMARY_FILE}: {e}")))
    });
    match summary {
        Ok(summary) => json_response(StatusCode::OK, summary),
        Err(err) => err.into_response(),
    }
}

async fn projections_handler(
    State(state): State<AppState>,
    Query(query): Query<ProjectionsQuery>,
) -> Response {
    let records = match read_artifact(&state.output_dir.join(PROJECTIONS_FILE))
        .and_then(|text| parse_projections(&text))
    {
        Ok(records) => records,
        Err(err) => return err.into_response(),
    };

    match select_projections(records, query.scenario, &state.config.base_scenario) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::NOT_FOUND, &msg),
    }
}

async fn sensitivity_handler(State(state): State<AppState>) -> Response {
    match read_artifact(&state.output_dir.join(SENSITIVITY_FILE))
        .and_then(|text| parse_sensitivity(&text))
    {
        Ok(grid) => json_response(StatusCode::OK, grid),
        Err(err) => err.into_response(),
    }
}

async fn valuate_handler(
    State(state): State<AppState>,
    payload: Result<Json<ValuatePayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, &rejection.body_text());
        }
    };
    let (config, raw) = match valuation_request(&state.config, payload) {
        Ok(request) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    match evaluate(&config, &raw) {
        Ok(report) => json_response(StatusCode::OK, Summary::from(&report)),
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn read_artifact(path: &Path) -> Result<String, ArtifactError> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ArtifactError::Missing,
        _ => ArtifactError::Unreadable(format!("{}: {e}", path.display())),
    })
}

fn parse_projections(text: &str) -> Result<Vec<ProjectionRecord>, ArtifactError> {
    csv::Reader::from_reader(text.as_bytes())
        .deserialize()
        .collect::<Result<Vec<ProjectionRecord>, _>>()
        .map_err(|e| ArtifactError::Unreadable(format!("{PROJECTIONS_FILE}: {e}")))
}

/// Requested scenario, else the base scenario, else the first one written.
fn select_projections(
    records: Vec<ProjectionRecord>,
    requested: Option<String>,
    base_scenario: &str,
) -> Result<ProjectionsResponse, String> {
    let has = |name: &str| records.iter().any(|r| r.scenario == name);
    let scenario = match requested {
        Some(name) if has(&name) => name,
        Some(name) => return Err(format!("Scenario `{name}` not found in projections")),
        None if has(base_scenario) => base_scenario.to_string(),
        None => match records.first() {
            Some(first) => first.scenario.clone(),
            None => return Err("No projections available".to_string()),
        },
    };

    let rows = records
        .into_iter()
        .filter(|r| r.scenario == scenario)
        .collect();
    Ok(ProjectionsResponse { scenario, rows })
}

fn parse_sensitivity(text: &str) -> Result<SensitivityResponse, ArtifactError> {
    let corrupt = |detail: String| ArtifactError::Unreadable(format!("{SENSITIVITY_FILE}: {detail}"));
    let parse = |cell: &str| {
        cell.parse::<f64>()
            .map_err(|_| corrupt(format!("invalid number `{cell}`")))
    };

    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| corrupt(e.to_string()))?.clone();
    let terminal_g_values = headers
        .iter()
        .skip(1)
        .map(parse)
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| corrupt(e.to_string()))?;
        let mut cells = record.iter();
        let wacc = parse(cells.next().unwrap_or_default())?;
        let ev = cells
            .map(|cell| match cell {
                NOT_AVAILABLE => Ok(None),
                value => parse(value).map(Some),
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(SensitivityRow { wacc, ev });
    }

    Ok(SensitivityResponse {
        terminal_g_values,
        rows,
    })
}

/// Applies the payload's overrides to the server configuration, the same
/// way a config file would, and validates the result.
fn valuation_request(
    base: &ValuationConfig,
    payload: ValuatePayload,
) -> Result<(ValuationConfig, RawFinancials), ConfigError> {
    let mut config = base.clone();

    if let Some(v) = payload.company_name {
        config.company_name = v;
    }
    if let Some(v) = payload.currency {
        config.currency = v;
    }
    if let Some(v) = payload.years_forecast {
        config.years_forecast = v;
    }
    if let Some(v) = payload.tax_rate {
        config.tax_rate = v;
    }
    if let Some(v) = payload.net_debt {
        config.net_debt = v;
    }
    if let Some(v) = payload.terminal_share_warning_threshold {
        config.terminal_share_warning_threshold = v;
    }
    if let Some(v) = payload.margin_basis {
        config.margin_basis = v;
    }
    if let Some(v) = payload.base_scenario {
        config.base_scenario = v;
    }
    if let Some(v) = payload.scenarios {
        config.scenarios = v;
    }
    if let Some(v) = payload.sensitivity {
        config.sensitivity = v;
    }
    config.validate()?;

    let raw = RawFinancials {
        income_statement: payload.income_statement,
        balance_sheet: payload.balance_sheet,
        cash_flow: payload.cash_flow,
    };
    Ok((config, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::fixtures::sample_financials;
    use crate::io::write_outputs;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state_for(dir: &Path) -> AppState {
        AppState::new(dir.to_path_buf(), ValuationConfig::default())
    }

    fn written_outputs() -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        let report =
            evaluate(&ValuationConfig::default(), &sample_financials()).expect("valid fixture");
        write_outputs(&report, dir.path()).expect("writes");
        dir
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value, Response) {
        let response = router(state).oneshot(request).await.expect("infallible");
        let status = response.status();
        let (parts, body) = response.into_parts();
        let bytes = to_bytes(body, usize::MAX).await.expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json, Response::from_parts(parts, Body::empty()))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request")
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn statements() -> Value {
        let raw = sample_financials();
        json!({
            "income_statement": raw.income_statement,
            "balance_sheet": raw.balance_sheet,
            "cash_flow": raw.cash_flow,
        })
    }

    #[tokio::test]
    async fn missing_outputs_answer_404_with_hint() {
        let dir = TempDir::new().expect("tempdir");
        for uri in ["/api/summary", "/api/projections", "/api/sensitivity"] {
            let (status, body, response) = send(state_for(dir.path()), get(uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert!(
                body["error"]
                    .as_str()
                    .expect("error message")
                    .starts_with("Outputs not found. Run the pipeline first")
            );
            assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        }
    }

    #[tokio::test]
    async fn summary_is_served_as_written() {
        let dir = written_outputs();
        let (status, body, response) = send(state_for(dir.path()), get("/api/summary")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["company"], "Ambev");
        assert!(body["scenarios"]["upside"]["enterprise_value"].is_number());
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[tokio::test]
    async fn projections_default_to_base_scenario() {
        let dir = written_outputs();
        let (status, body, _) = send(state_for(dir.path()), get("/api/projections")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scenario"], "base");
        assert_eq!(body["rows"].as_array().map(Vec::len), Some(5));

        let (status, body, _) =
            send(state_for(dir.path()), get("/api/projections?scenario=downside")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows"][0]["scenario"], "downside");

        let (status, _, _) =
            send(state_for(dir.path()), get("/api/projections?scenario=nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn projections_fall_back_to_first_scenario_without_base() {
        let record = |scenario: &str| ProjectionRecord {
            year: 2024,
            revenue: 1.0,
            ebit: 1.0,
            nopat: 1.0,
            delta_nwc: 0.0,
            capex: 0.0,
            depreciation: 0.0,
            fcf: 1.0,
            scenario: scenario.to_string(),
        };
        let response = select_projections(vec![record("bear"), record("bull")], None, "base")
            .expect("fallback");
        assert_eq!(response.scenario, "bear");
        assert_eq!(response.rows.len(), 1);
        assert!(select_projections(Vec::new(), None, "base").is_err());
    }

    #[test]
    fn sensitivity_csv_is_parsed_with_gaps() {
        let grid = parse_sensitivity("wacc,0.02,0.05\n0.04,1500.5,N/A\n0.1,900,1200\n")
            .expect("valid csv");
        assert_eq!(grid.terminal_g_values, vec![0.02, 0.05]);
        assert_eq!(grid.rows[0].ev, vec![Some(1500.5), None]);
        assert_eq!(grid.rows[1].wacc, 0.1);

        assert!(matches!(
            parse_sensitivity("wacc,0.02\n0.04,abc\n"),
            Err(ArtifactError::Unreadable(_))
        ));
    }

    #[tokio::test]
    async fn sensitivity_endpoint_serves_the_grid() {
        let dir = written_outputs();
        let (status, body, _) = send(state_for(dir.path()), get("/api/sensitivity")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["terminal_g_values"].as_array().map(Vec::len), Some(5));
        assert_eq!(body["rows"].as_array().map(Vec::len), Some(7));
    }

    #[tokio::test]
    async fn valuate_runs_in_memory_with_overrides() {
        let dir = TempDir::new().expect("tempdir");
        let mut payload = statements();
        payload["company_name"] = json!("Acme");
        payload["years_forecast"] = json!(3);
        payload["scenarios"] = json!([{
            "name": "only",
            "revenue_growth": 0.03,
            "ebit_margin": 0.3,
            "wacc": 0.1,
            "terminal_g": 0.02,
            "capex_pct_rev": 0.05,
            "depreciation_pct_capex": 0.9,
            "nwc_pct_rev_change": 0.1
        }]);
        payload["base_scenario"] = json!("only");

        let (status, body, _) =
            send(state_for(dir.path()), post_json("/api/valuate", &payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["company"], "Acme");
        assert!(body["scenarios"]["only"]["equity_value"].is_number());
        assert_eq!(body["sensitivity_analysis"]["base_scenario"], "only");
        assert!(!dir.path().join(SUMMARY_FILE).exists());
    }

    #[tokio::test]
    async fn valuate_rejects_bad_data_and_bad_overrides() {
        let dir = TempDir::new().expect("tempdir");

        let mut missing_cash_flow = statements();
        missing_cash_flow["cash_flow"] = json!([]);
        let (status, body, _) =
            send(state_for(dir.path()), post_json("/api/valuate", &missing_cash_flow)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("message").contains("cash_flow"));

        let mut bad_tax = statements();
        bad_tax["tax_rate"] = json!(1.5);
        let (status, body, _) =
            send(state_for(dir.path()), post_json("/api/valuate", &bad_tax)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("message").contains("tax_rate"));
    }

    #[tokio::test]
    async fn valuate_rejects_oversized_horizon() {
        let dir = TempDir::new().expect("tempdir");
        let mut payload = statements();
        payload["years_forecast"] = json!(u32::MAX);

        let (status, body, response) =
            send(state_for(dir.path()), post_json("/api/valuate", &payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("message").contains("years_forecast"));
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[tokio::test]
    async fn valuate_answers_body_errors_as_json() {
        let dir = TempDir::new().expect("tempdir");

        let (status, body, response) = send(
            state_for(dir.path()),
            post_json("/api/valuate", &json!({ "tax_rat": 0.3 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("message").contains("tax_rat"));
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let malformed = Request::builder()
            .method("POST")
            .uri("/api/valuate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"income_statement\": ["))
            .expect("request");
        let (status, body, response) = send(state_for(dir.path()), malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[tokio::test]
    async fn index_and_unknown_routes() {
        let dir = TempDir::new().expect("tempdir");
        let response = router(state_for(dir.path()))
            .oneshot(get("/"))
            .await
            .expect("infallible");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let (status, body, _) = send(state_for(dir.path()), get("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not found");
    }
}
