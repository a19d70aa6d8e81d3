//! HTTP surface of a node.
//!
//! # Routes
//!
//! - `GET /` - greeting naming the node
//! - `GET /private` - target of peers' private checks
//! - `GET /dmz` - target of the DMZ check
//! - `GET /report` - fleet report as an HTML table
//! - `GET /api/report` - fleet report as JSON

use std::net::SocketAddr;

use askama::Template;
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::probe::CheckType;
use crate::report::{CheckReport, FleetReport, NodeReport, ReportAggregator};
use crate::schedule::stopped;
use crate::self_report::SelfReporter;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub reporter: SelfReporter,
    pub aggregator: ReportAggregator,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/private", get(private_health))
        .route("/dmz", get(dmz_health))
        .route("/report", get(report_page))
        .route("/api/report", get(report_json))
        .with_state(state)
}

/// Serve `app` on `addr` until the shutdown flag is raised.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP listener started");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stopped(&mut shutdown).await })
        .await?;
    Ok(())
}

async fn hello(State(state): State<AppState>) -> String {
    format!("Hello from {}", state.reporter.node_id())
}

async fn private_health(State(state): State<AppState>) -> &'static str {
    state.reporter.report_private().await;
    "ok"
}

async fn dmz_health(State(state): State<AppState>) -> &'static str {
    state.reporter.report_dmz().await;
    "ok"
}

async fn report_json(State(state): State<AppState>) -> Json<FleetReport> {
    Json(state.aggregator.build_report().await)
}

async fn report_page(State(state): State<AppState>) -> Html<String> {
    Html(render_report(&state.aggregator.build_report().await))
}

// ── Report page ─────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate {
    nodes: Vec<NodeView>,
}

/// One node's section of the page, pre-formatted for the template.
struct NodeView {
    node: String,
    liveness: String,
    status_class: &'static str,
    rows: Vec<RowView>,
}

struct RowView {
    check: &'static str,
    dest: String,
    result: String,
    result_class: &'static str,
}

impl NodeView {
    fn from_report(node: &NodeReport) -> Self {
        let rows = [
            (CheckType::Dmz, &node.dmz),
            (CheckType::Nat, &node.nat),
            (CheckType::Private, &node.private),
        ]
        .into_iter()
        .flat_map(|(check, rows)| rows.iter().map(move |row| RowView::new(check, row)))
        .collect();

        Self {
            node: node.node.clone(),
            liveness: node.liveness.to_string(),
            status_class: if node.is_live() { "pass" } else { "stale" },
            rows,
        }
    }
}

impl RowView {
    fn new(check: CheckType, row: &CheckReport) -> Self {
        Self {
            check: check.as_str(),
            dest: row.dest.clone(),
            result: row.result.to_string(),
            result_class: if row.passed() { "pass" } else { "fail" },
        }
    }
}

/// Render the report as a standalone HTML page.
pub fn render_report(report: &FleetReport) -> String {
    let page = ReportTemplate {
        nodes: report.nodes.iter().map(NodeView::from_report).collect(),
    };
    page.render().unwrap_or_else(|e| {
        error!(error = %e, "Unable to render report page");
        format!("<pre>Template error: {e}</pre>")
    })
}
