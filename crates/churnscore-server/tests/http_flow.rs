use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

fn reserve_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("reserve addr");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr.to_string()
}

fn wait_for_http(addr: &str) {
    for _ in 0..80 {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("http server not ready on {addr}");
}

fn spawn_daemon(addr: &str, extra_env: &[(&str, &str)]) -> Child {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_churnscored"));
    cmd.env("CHURNSCORE_HTTP_ADDR", addr)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    cmd.spawn().expect("spawn churnscored")
}

fn send_http(addr: &str, method: &str, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect http");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).expect("write request");
    stream.flush().expect("flush");
    let mut buf = String::new();
    stream.read_to_string(&mut buf).expect("read response");
    buf
}

fn send_raw(addr: &str, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect http");
    stream.write_all(raw.as_bytes()).expect("write request");
    stream.flush().expect("flush");
    let mut buf = String::new();
    stream.read_to_string(&mut buf).expect("read response");
    buf
}

fn response_body(response: &str) -> &str {
    response.split("\r\n\r\n").nth(1).unwrap_or("")
}

fn response_header(response: &str) -> &str {
    response.split("\r\n\r\n").next().unwrap_or("")
}

#[test]
fn http_health_and_score_work() {
    let addr = reserve_addr();
    let mut child = spawn_daemon(&addr, &[]);
    wait_for_http(&addr);

    let health = send_http(&addr, "GET", "/health", "");
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(response_header(&health).contains("Content-Type: application/json"));
    assert!(response_body(&health).contains("\"status\":\"ok\""));

    let body = r#"{"items":[{"memberId":"m1","features":{"lastActiveDaysAgo":2,"engagementScore":0.4,"lifetimeValue":120}},{"memberId":"m2","features":{"lastActiveDaysAgo":20,"engagementScore":0.1,"lifetimeValue":50}}]}"#;
    let scored = send_http(&addr, "POST", "/score", body);
    assert!(scored.starts_with("HTTP/1.1 200"));
    let data: serde_json::Value =
        serde_json::from_str(response_body(&scored)).expect("score json");
    let items = data.as_array().expect("array response");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["memberId"], "m1");
    assert_eq!(items[1]["memberId"], "m2");
    assert!(items[0].get("riskScore").is_some());
    assert_eq!(
        items[1]["reasons"],
        serde_json::json!(["inactive_recently", "low_engagement", "low_ltv"])
    );

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn http_errors_and_metrics_work() {
    let addr = reserve_addr();
    let mut child = spawn_daemon(&addr, &[("CHURNSCORE_MAX_BODY_BYTES", "2048")]);
    wait_for_http(&addr);

    let bad = send_http(&addr, "POST", "/score", r#"{"items":[{"features":{}}]}"#);
    assert!(bad.starts_with("HTTP/1.1 400"));
    assert!(response_body(&bad).contains("\"error\":\"invalid_request\""));

    let missing = send_http(&addr, "GET", "/missing", "");
    assert!(missing.starts_with("HTTP/1.1 404"));

    let big = format!(r#"{{"items":[],"pad":"{}"}}"#, "x".repeat(4_096));
    let too_large = send_http(&addr, "POST", "/score", &big);
    assert!(too_large.starts_with("HTTP/1.1 413"));

    let metrics = send_http(&addr, "GET", "/metrics", "");
    assert!(metrics.starts_with("HTTP/1.1 200"));
    let text = response_body(&metrics);
    assert!(text.contains("churnscore_http_requests_total{route=\"score\",status=\"400\"} 1"));
    assert!(text.contains("churnscore_http_requests_total{route=\"unknown\",status=\"404\"} 1"));

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn http_malformed_content_length_gets_400() {
    let addr = reserve_addr();
    let mut child = spawn_daemon(&addr, &[]);
    wait_for_http(&addr);

    let resp = send_raw(
        &addr,
        "POST /score HTTP/1.1\r\nHost: x\r\nContent-Length: ten\r\nConnection: close\r\n\r\n",
    );
    assert!(resp.starts_with("HTTP/1.1 400"));
    assert!(response_body(&resp).contains("\"error\":\"invalid_request\""));

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn http_connection_limit_answers_503() {
    let addr = reserve_addr();
    let mut child = spawn_daemon(
        &addr,
        &[
            ("CHURNSCORE_MAX_CONNECTIONS", "1"),
            ("CHURNSCORE_READ_TIMEOUT_MS", "5000"),
        ],
    );
    wait_for_http(&addr);
    std::thread::sleep(Duration::from_millis(200));

    let idle = TcpStream::connect(&addr).expect("idle connection");
    std::thread::sleep(Duration::from_millis(200));

    let mut second = TcpStream::connect(&addr).expect("second connection");
    let mut buf = String::new();
    second.read_to_string(&mut buf).expect("read busy response");
    assert!(buf.starts_with("HTTP/1.1 503"));
    assert!(response_body(&buf).contains("\"error\":\"server_busy\""));

    drop(idle);
    let _ = child.kill();
    let _ = child.wait();
}
