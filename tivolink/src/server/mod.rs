//! HTTP front end.
//!
//! Two kinds of request reach the server:
//!
//! ```text
//! GET /TiVoConnect?Command=...   ──► command dispatch ──► XML
//! GET /<share>/<path>            ──► handler.send_file ──► JPEG / video
//! ```
//!
//! Handler work is blocking (directory walks, image decoding, encoder
//! subprocesses) and runs on `spawn_blocking` workers. Streamed bodies
//! travel back through [`BridgeSink`].

mod bridge;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;

use crate::config::{ConfigFile, DeviceProfile, ShareConfig};
use crate::handler::{ContainerHandler, HandlerError, Handlers, RequestContext};
use crate::query::Query;
use crate::render;
use crate::transcode::Transcoder;
use crate::transfer::{Framing, StreamHead, TransferSink};

pub use bridge::{BridgeSink, PIPE_CAPACITY};

/// Name shown for the server in the root container.
pub const DEFAULT_SERVER_NAME: &str = "TivoLink";

/// Device id headers, in order of preference.
const DEVICE_HEADERS: &[&str] = &["TiVo_TCD_ID", "tsn"];

/// State shared by every request.
pub struct AppState {
    pub config: ConfigFile,
    pub handlers: Handlers,
    pub server_name: String,
}

impl AppState {
    pub fn new(config: ConfigFile, transcoder: Arc<dyn Transcoder>) -> Self {
        let handlers = Handlers::new(&config.server, transcoder);
        Self {
            config,
            handlers,
            server_name: DEFAULT_SERVER_NAME.to_string(),
        }
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.to_string()).into_response()
    }
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/TiVoConnect", get(tivo_connect))
        .fallback(fetch)
        .with_state(state)
}

/// Serve on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an I/O error if the listener cannot be bound or fails.
pub async fn serve<F>(state: Arc<AppState>, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        shares = state.config.shares.len(),
        "TiVoConnect server listening"
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Device serial number from the request headers; empty if absent.
fn device_id(headers: &HeaderMap) -> String {
    DEVICE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

/// Start offset of a `Range: bytes=N-` header.
pub fn range_offset(headers: &HeaderMap) -> u64 {
    headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("bytes="))
        .and_then(|range| range.split('-').next())
        .and_then(|start| start.trim().parse().ok())
        .unwrap_or(0)
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

/// Everything a blocking worker needs, owned.
struct Job {
    state: Arc<AppState>,
    share: ShareConfig,
    device: DeviceProfile,
    query: Query,
    client: String,
    range_offset: u64,
}

impl Job {
    fn context(&self) -> RequestContext<'_> {
        RequestContext {
            share: &self.share,
            device: &self.device,
            query: &self.query,
            guid: &self.state.config.server.guid,
            client: &self.client,
            range_offset: self.range_offset,
        }
    }

    fn handler(&self) -> &dyn ContainerHandler {
        self.state.handlers.for_kind(self.share.kind)
    }

    fn local_path(&self, url_path: &str) -> Option<PathBuf> {
        self.context().location().local_path_for(url_path)
    }
}

/// Run a document-producing handler call on a blocking worker.
async fn blocking_xml<F>(job: Job, work: F) -> Response
where
    F: FnOnce(&Job) -> Result<String, HandlerError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || work(&job)).await {
        Ok(Ok(body)) => xml(body),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Request rejected");
            e.into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Handler worker failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn tivo_connect(
    State(state): State<Arc<AppState>>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Response {
    let query = Query::parse(raw.as_deref().unwrap_or(""));
    let device = state.config.device(&device_id(&headers));
    let command = query.get("Command").unwrap_or("").to_string();
    tracing::debug!(command = %command, tsn = %device.tsn, "TiVoConnect request");

    match command.as_str() {
        "QueryContainer" => {
            let container = query.get("Container").unwrap_or("/");
            if container.is_empty() || container == "/" {
                return xml(render::root_container(
                    &state.server_name,
                    &state.config.shares,
                ));
            }
            let Some(job) = job_for(&state, container, device, query.clone(), &headers) else {
                return HandlerError::NotFound(container.to_string()).into_response();
            };
            blocking_xml(job, |job| job.handler().list_container(&job.context())).await
        }
        "QueryItem" => {
            let url = query.get("Url").unwrap_or("").to_string();
            let share = first_component(&url);
            let Some(job) = job_for(&state, &share, device, query, &headers) else {
                return HandlerError::NotFound(url).into_response();
            };
            blocking_xml(job, |job| job.handler().query_item(&job.context())).await
        }
        "TVBusQuery" => {
            let container = query.get("Container").unwrap_or("").to_string();
            let Some(job) = job_for(&state, &container, device, query, &headers) else {
                return HandlerError::NotFound(container).into_response();
            };
            blocking_xml(job, |job| job.handler().tvbus_query(&job.context())).await
        }
        "QueryFormats" => {
            let source = query.get("SourceFormat").unwrap_or("");
            if source.starts_with("video") {
                xml(render::video_formats(device.is_ts_capable()))
            } else {
                HandlerError::NotFound(format!("formats for {:?}", source)).into_response()
            }
        }
        "QueryServer" => xml(render::server_info()),
        "FlushServer" | "ResetServer" => {
            state.handlers.flush();
            StatusCode::OK.into_response()
        }
        other => HandlerError::NotFound(format!("command {:?}", other)).into_response(),
    }
}

/// Share named by the first component of a container or URL path.
fn first_component(path: &str) -> String {
    let decoded = urlencoding::decode(path)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| path.to_string());
    decoded
        .split('/')
        .find(|p| !p.is_empty())
        .unwrap_or("")
        .to_string()
}

fn job_for(
    state: &Arc<AppState>,
    container: &str,
    device: DeviceProfile,
    query: Query,
    headers: &HeaderMap,
) -> Option<Job> {
    let share = state.config.share(&first_component(container))?.clone();
    Some(Job {
        state: Arc::clone(state),
        share,
        device,
        query,
        client: device_client(headers),
        range_offset: range_offset(headers),
    })
}

fn device_client(headers: &HeaderMap) -> String {
    let id = device_id(headers);
    if id.is_empty() {
        "unknown".to_string()
    } else {
        id
    }
}

/// `GET /<share>/<path>`: stream one file.
async fn fetch(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Response {
    let query = Query::parse(raw.as_deref().unwrap_or(""));
    let device = state.config.device(&device_id(&headers));
    let Some(job) = job_for(&state, uri.path(), device, query, &headers) else {
        return HandlerError::NotFound(uri.path().to_string()).into_response();
    };
    let Some(path) = job.local_path(uri.path()) else {
        return HandlerError::NotFound(uri.path().to_string()).into_response();
    };
    if !path.is_file() {
        return HandlerError::NotFound(uri.path().to_string()).into_response();
    }

    let (head_tx, head_rx) = oneshot::channel();
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let mut sink = BridgeSink::new(head_tx, writer);
    let worker = tokio::task::spawn_blocking(move || {
        let result = job.handler().send_file(&job.context(), &path, &mut sink);
        if result.is_ok() && !sink.started() {
            tracing::warn!(path = %path.display(), "Handler finished without a response");
        }
        result
    });

    match head_rx.await {
        Ok(head) => stream_response(head, reader),
        // The sender is dropped without a head when the handler rejected
        // the request before streaming.
        Err(_) => match worker.await {
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Fetch rejected");
                e.into_response()
            }
            Ok(Ok(())) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Fetch worker failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
    }
}

fn stream_response(head: StreamHead, reader: tokio::io::DuplexStream) -> Response {
    let status = StatusCode::from_u16(head.status).unwrap_or(StatusCode::OK);
    let body = Body::from_stream(ReaderStream::new(reader));
    let mut response = Response::new(body);
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&head.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Framing::Fixed {
        length,
        content_range,
    } = &head.framing
    {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(*length));
        if let Some(range) = content_range.as_deref().and_then(|r| HeaderValue::from_str(r).ok()) {
            headers.insert(header::CONTENT_RANGE, range);
        }
    }
    response
}
