//! HTTP status surface: liveness plus the per-series completeness rows.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use kameo::actor::ActorRef;
use kameo::request::MessageSend;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::api::HistoricalSource;
use crate::backfill::{BackfillActor, GetReport};
use crate::store::SeriesStore;

const GAP_LOG_PAGE: u32 = 100;

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("{}"))))
}

async fn handle_request<S, H>(
    req: Request<Incoming>,
    store: Arc<S>,
    backfill: ActorRef<BackfillActor<S, H>>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    S: SeriesStore + Send + Sync + 'static,
    H: HistoricalSource + Send + Sync + 'static,
{
    let path = req.uri().path().to_string();
    match (req.method(), path.as_str()) {
        (&Method::GET, "/health") => {
            let body = json!({
                "status": "healthy",
                "service": "gapfill",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            Ok(json_response(StatusCode::OK, body.to_string()))
        }
        (&Method::GET, "/report") => match backfill.ask(GetReport).send().await {
            Ok(report) => {
                let body = serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string());
                Ok(json_response(StatusCode::OK, body))
            }
            Err(e) => {
                error!("backfill report request failed: {}", e);
                Ok(json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": e.to_string() }).to_string(),
                ))
            }
        },
        (&Method::GET, "/status") => match store.read_all_statuses().await {
            Ok(statuses) => {
                let body = serde_json::to_string(&statuses).unwrap_or_else(|_| "[]".to_string());
                Ok(json_response(StatusCode::OK, body))
            }
            Err(e) => {
                error!("status query failed: {}", e);
                Ok(json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": e.to_string() }).to_string(),
                ))
            }
        },
        (&Method::GET, "/gaps") => match store.recent_gap_log(GAP_LOG_PAGE).await {
            Ok(entries) => {
                let body = serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string());
                Ok(json_response(StatusCode::OK, body))
            }
            Err(e) => {
                error!("gap log query failed: {}", e);
                Ok(json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": e.to_string() }).to_string(),
                ))
            }
        },
        (&Method::GET, path) if path.starts_with("/status/") => {
            let symbol = path.trim_start_matches("/status/");
            match store.read_all_statuses().await {
                Ok(statuses) => {
                    let matching: Vec<_> = statuses
                        .into_iter()
                        .filter(|s| s.series.symbol.eq_ignore_ascii_case(symbol))
                        .collect();
                    if matching.is_empty() {
                        Ok(json_response(
                            StatusCode::NOT_FOUND,
                            json!({ "error": format!("no tracked series for {}", symbol) }).to_string(),
                        ))
                    } else {
                        let body =
                            serde_json::to_string(&matching).unwrap_or_else(|_| "[]".to_string());
                        Ok(json_response(StatusCode::OK, body))
                    }
                }
                Err(e) => {
                    error!("status query failed: {}", e);
                    Ok(json_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        json!({ "error": e.to_string() }).to_string(),
                    ))
                }
            }
        }
        _ => Ok(json_response(
            StatusCode::NOT_FOUND,
            json!({ "error": "not found" }).to_string(),
        )),
    }
}

/// Run the status HTTP server. Serves until the process exits.
pub async fn start_status_server<S, H>(
    port: u16,
    store: S,
    backfill: ActorRef<BackfillActor<S, H>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SeriesStore + Send + Sync + 'static,
    H: HistoricalSource + Send + Sync + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let store = Arc::new(store);

    info!("status server listening on http://{}", addr);
    info!("  liveness:     http://{}/health", addr);
    info!("  all series:   http://{}/status", addr);
    info!("  one symbol:   http://{}/status/{{symbol}}", addr);
    info!("  recent gaps:  http://{}/gaps", addr);
    info!("  fill report:  http://{}/report", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let store = Arc::clone(&store);
        let backfill = backfill.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                handle_request(req, Arc::clone(&store), backfill.clone())
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("error serving connection: {:?}", err);
            }
        });
    }
}
