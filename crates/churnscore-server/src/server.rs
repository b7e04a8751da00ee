use std::collections::HashMap;
use std::io::{self, BufRead, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use churnscore_core::{heuristic_result, rank_by_risk, RiskScorer, ScoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::RequestError;
use crate::metrics::{Metrics, PROMETHEUS_CONTENT_TYPE};
use crate::protocol::{ErrorBody, HealthResponse, RankRequest, RankResponse, ScoreRequest};

/// Request line plus headers.
const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_HEADERS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Health,
    Metrics,
    Score,
    RankMembers,
    Unknown,
}

impl Route {
    fn resolve(path: &str) -> Self {
        match path.trim_end_matches('/') {
            "/health" => Self::Health,
            "/metrics" => Self::Metrics,
            "/score" => Self::Score,
            "/score/members" => Self::RankMembers,
            _ => Self::Unknown,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Metrics => "metrics",
            Self::Score => "score",
            Self::RankMembers => "score_members",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RankMode {
    Model,
    Heuristic,
}

impl RankMode {
    fn from_query(query: &HashMap<String, String>) -> Result<Self, RequestError> {
        match query.get("mode").map(String::as_str) {
            None | Some("" | "model") => Ok(Self::Model),
            Some("heuristic") => Ok(Self::Heuristic),
            Some(other) => Err(RequestError::InvalidMode(other.to_string())),
        }
    }
}

/// Request handler built once at startup and shared by every connection.
pub struct ScoreServer {
    config: ServerConfig,
    scorer: RiskScorer,
    metrics: Metrics,
    active_connections: AtomicUsize,
}

/// Holds one of the `max_connections` slots until dropped.
struct ConnectionSlot<'a> {
    active: &'a AtomicUsize,
}

impl Drop for ConnectionSlot<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ScoreServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_scorer(config, RiskScorer::default())
    }

    pub fn with_scorer(config: ServerConfig, scorer: RiskScorer) -> Self {
        Self {
            config,
            scorer,
            metrics: Metrics::new(),
            active_connections: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Binds `addr` and serves forever. Each connection gets its own
    /// thread, up to `max_connections`; connections past that get a 503.
    pub fn serve_http(&self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr)?;
        info!(
            addr = %listener.local_addr()?,
            max_connections = self.config.max_connections,
            "churnscore http listening"
        );
        thread::scope(|scope| {
            for stream in listener.incoming() {
                match stream {
                    Ok(mut stream) => {
                        let Some(slot) = self.try_acquire_connection() else {
                            if let Err(err) = self.reject_busy(&mut stream) {
                                warn!(error = %err, "http busy response error");
                            }
                            continue;
                        };
                        scope.spawn(move || {
                            let _slot = slot;
                            if let Err(err) = self.handle_http_connection(stream) {
                                warn!(error = %err, "http request error");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "http accept error");
                    }
                }
            }
        });
        Ok(())
    }

    fn try_acquire_connection(&self) -> Option<ConnectionSlot<'_>> {
        let limit = self.config.max_connections;
        self.active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                active: &self.active_connections,
            })
    }

    fn reject_busy(&self, stream: &mut TcpStream) -> io::Result<()> {
        let err = RequestError::ServerBusy {
            limit: self.config.max_connections,
        };
        warn!(limit = self.config.max_connections, "connection limit reached");
        self.metrics
            .record_request("rejected", err.status(), Duration::ZERO);
        stream.set_write_timeout(Some(self.config.read_timeout))?;
        write_http_response(stream, &HttpResponse::error(&err))
    }

    fn handle_http_connection(&self, mut stream: TcpStream) -> io::Result<()> {
        let started = Instant::now();
        stream.set_read_timeout(Some(self.config.read_timeout))?;
        stream.set_write_timeout(Some(self.config.read_timeout))?;
        let response = match read_http_request(&stream, self.config.max_body_bytes)? {
            None => return Ok(()),
            Some(Ok(req)) => self.dispatch(&req),
            Some(Err(err)) => {
                debug!(status = err.status(), error = %err, "request framing rejected");
                self.metrics
                    .record_request("rejected", err.status(), started.elapsed());
                HttpResponse::error(&err)
            }
        };
        write_http_response(&mut stream, &response)
    }

    /// Routes one request without touching a socket. `target` may carry a
    /// query string.
    pub fn handle(&self, method: &str, target: &str, body: &[u8]) -> HttpResponse {
        let (path, query) = parse_path_query(target);
        let req = HttpRequest {
            method: method.to_ascii_uppercase(),
            path,
            query,
            content_length: body.len(),
            body: body.to_vec(),
        };
        self.dispatch(&req)
    }

    fn dispatch(&self, req: &HttpRequest) -> HttpResponse {
        let started = Instant::now();
        let route = Route::resolve(&req.path);
        let response = match self.route(route, req) {
            Ok(response) => response,
            Err(err) => {
                if err.status() >= 500 {
                    error!(route = route.label(), error = %err, "request failed");
                } else {
                    debug!(route = route.label(), status = err.status(), error = %err, "request rejected");
                }
                HttpResponse::error(&err)
            }
        };
        self.metrics
            .record_request(route.label(), response.status, started.elapsed());
        response
    }

    fn route(&self, route: Route, req: &HttpRequest) -> Result<HttpResponse, RequestError> {
        match (route, req.method.as_str()) {
            (Route::Health, "GET") => HttpResponse::json(200, &HealthResponse::OK),
            (Route::Metrics, "GET") => Ok(HttpResponse::text(
                200,
                PROMETHEUS_CONTENT_TYPE,
                self.metrics.render_text(),
            )),
            (Route::Score, "POST") => self.exec_score(req),
            (Route::RankMembers, "POST") => self.exec_rank_members(req),
            (Route::Unknown, _) => Err(RequestError::NotFound(req.path.clone())),
            (_, method) => Err(RequestError::MethodNotAllowed {
                method: method.to_string(),
                path: req.path.clone(),
            }),
        }
    }

    fn exec_score(&self, req: &HttpRequest) -> Result<HttpResponse, RequestError> {
        let request: ScoreRequest = self.parse_body(req)?;
        self.check_batch(request.items.len())?;
        for item in &request.items {
            item.features
                .ensure_finite()
                .map_err(|source| RequestError::InvalidFeature {
                    member_id: item.member_id.clone(),
                    source,
                })?;
        }

        let results = self.scorer.score_batch(
            request
                .items
                .iter()
                .map(|item| (item.member_id.as_str(), &item.features)),
        );
        self.metrics.record_scored(&results);
        debug!(items = results.len(), "scored batch");
        HttpResponse::json(200, &results)
    }

    fn exec_rank_members(&self, req: &HttpRequest) -> Result<HttpResponse, RequestError> {
        let mode = RankMode::from_query(&req.query)?;
        let request: RankRequest = self.parse_body(req)?;
        self.check_batch(request.members.len())?;
        let now = Utc::now();
        for member in &request.members {
            member
                .build_features(now)
                .ensure_finite()
                .map_err(|source| RequestError::InvalidFeature {
                    member_id: member.member_id.clone(),
                    source,
                })?;
        }

        let mut items: Vec<ScoreResult> = match mode {
            RankMode::Model => request
                .members
                .iter()
                .map(|member| member.score_with(&self.scorer, now))
                .collect(),
            RankMode::Heuristic => request
                .members
                .iter()
                .map(|member| heuristic_result(member, now))
                .collect(),
        };
        rank_by_risk(&mut items);
        self.metrics.record_scored(&items);
        debug!(members = items.len(), ?mode, "ranked members");

        HttpResponse::json(
            200,
            &RankResponse {
                items,
                fallback: mode == RankMode::Heuristic,
            },
        )
    }

    fn parse_body<T: DeserializeOwned>(&self, req: &HttpRequest) -> Result<T, RequestError> {
        if req.content_length > self.config.max_body_bytes {
            return Err(RequestError::PayloadTooLarge {
                size: req.content_length,
                limit: self.config.max_body_bytes,
            });
        }
        Ok(serde_json::from_slice(&req.body)?)
    }

    fn check_batch(&self, size: usize) -> Result<(), RequestError> {
        if size > self.config.max_batch_items {
            return Err(RequestError::BatchTooLarge {
                size,
                limit: self.config.max_batch_items,
            });
        }
        Ok(())
    }
}

impl Default for ScoreServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    content_length: usize,
    body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Result<Self, RequestError> {
        let body =
            serde_json::to_vec(value).map_err(|err| RequestError::Encode(err.to_string()))?;
        Ok(Self {
            status,
            content_type: "application/json",
            body,
        })
    }

    fn text(status: u16, content_type: &'static str, body: String) -> Self {
        Self {
            status,
            content_type,
            body: body.into_bytes(),
        }
    }

    fn error(err: &RequestError) -> Self {
        let payload = ErrorBody {
            error: err.code().to_string(),
            message: err.to_string(),
        };
        let body = serde_json::to_vec(&payload).unwrap_or_else(|_| {
            br#"{"error":"internal_error","message":"failed to encode error"}"#.to_vec()
        });
        Self {
            status: err.status(),
            content_type: "application/json",
            body,
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Reads one request. The request line and headers together may not exceed
/// `MAX_HEADER_BYTES`; framing problems come back as `Some(Err(_))` so the
/// caller can still answer. Bodies larger than `max_body_bytes` are discarded
/// and reported through `content_length` so dispatch can answer 413.
fn read_http_request(
    stream: &TcpStream,
    max_body_bytes: usize,
) -> io::Result<Option<Result<HttpRequest, RequestError>>> {
    let mut reader = io::BufReader::new(stream.try_clone()?);
    let mut head = reader.by_ref().take(MAX_HEADER_BYTES as u64);
    let too_large = || RequestError::HeadersTooLarge {
        limit: MAX_HEADER_BYTES,
        max_headers: MAX_HEADERS,
    };

    let mut line = String::new();
    if head.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') && head.limit() == 0 {
        return Ok(Some(Err(too_large())));
    }
    let first = line.trim_end_matches(['\r', '\n']);
    if first.is_empty() {
        return Ok(None);
    }

    let mut parts = first.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(Some(Err(RequestError::Malformed(
            "invalid http request line".to_string(),
        ))));
    };
    let method = method.to_ascii_uppercase();
    let (path, query) = parse_path_query(target);

    let mut content_length = 0usize;
    let mut header_count = 0usize;
    loop {
        let mut header = String::new();
        if head.read_line(&mut header)? == 0 {
            if head.limit() == 0 {
                return Ok(Some(Err(too_large())));
            }
            break;
        }
        if !header.ends_with('\n') && head.limit() == 0 {
            return Ok(Some(Err(too_large())));
        }
        let header = header.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            break;
        }
        header_count += 1;
        if header_count > MAX_HEADERS {
            return Ok(Some(Err(too_large())));
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                match value.trim().parse::<usize>() {
                    Ok(v) => content_length = v,
                    Err(_) => {
                        return Ok(Some(Err(RequestError::Malformed(format!(
                            "invalid content-length `{}`",
                            value.trim()
                        )))))
                    }
                }
            }
        }
    }

    let reader = head.into_inner();
    let mut body = Vec::new();
    if content_length > max_body_bytes {
        // Drain so closing the socket does not reset the 413 response.
        io::copy(&mut reader.take(content_length as u64), &mut io::sink())?;
    } else if content_length > 0 {
        body.resize(content_length, 0);
        reader.read_exact(&mut body)?;
    }
    Ok(Some(Ok(HttpRequest {
        method,
        path,
        query,
        content_length,
        body,
    })))
}

fn write_http_response(stream: &mut TcpStream, response: &HttpResponse) -> io::Result<()> {
    let headers = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        http_reason_phrase(response.status),
        response.content_type,
        response.body.len()
    );
    stream.write_all(headers.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}

const fn http_reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

fn parse_path_query(raw: &str) -> (String, HashMap<String, String>) {
    let (path, query_str) = match raw.split_once('?') {
        Some((p, q)) => (p.to_string(), q),
        None => (raw.to_string(), ""),
    };
    let mut query = HashMap::new();
    for pair in query_str.split('&') {
        if pair.is_empty() {
            continue;
        }
        if let Some((k, v)) = pair.split_once('=') {
            query.insert(k.to_string(), v.to_string());
        } else {
            query.insert(pair.to_string(), String::new());
        }
    }
    (path, query)
}
