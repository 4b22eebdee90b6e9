//! Login, watch and control commands against a mock backend.

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

fn store_session(home: &TempDir, token: &str, role: &str) {
    fs::write(
        home.path().join("session.json"),
        json!({ "token": token, "role": role }).to_string(),
    )
    .unwrap();
}

#[tokio::test]
async fn test_login_stores_session() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token": "tok-9", "role": "official" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .env("LANESYNC_BASE_URL", server.uri())
        .args(["login", "--username", "ops", "--password", "pw"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged in as ops (official)"));

    let stored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(home.path().join("session.json")).unwrap())
            .unwrap();
    assert_eq!(stored["token"], "tok-9");

    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged out."));
    assert!(!home.path().join("session.json").exists());
}

#[tokio::test]
async fn test_watch_clears_session_on_expiry() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    store_session(&home, "stale", "user");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/traffic_data"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "invalid_token" })))
        .mount(&server)
        .await;

    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .args(["--base-url", &server.uri(), "watch", "--interval", "500"])
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .success()
        .stdout(predicate::str::contains("unauthenticated"))
        .stderr(predicate::str::contains("Session expired, please login again."));

    assert!(!home.path().join("session.json").exists());
}

#[tokio::test]
async fn test_watch_prints_status_until_killed() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/traffic_data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "counts": [5, 0, 2, 1],
            "next_lane": 2,
            "signal_timer": 7.6,
            "mode": "camera",
            "emergency": true,
            "emergency_lane": 2,
            "timestamp": 1_700_000_000.0
        })))
        .mount(&server)
        .await;

    // Stdin is closed, so the watch only ends when the timeout kills it.
    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .env("LANESYNC_BASE_URL", server.uri())
        .args(["watch", "--json", "--interval", "200"])
        .timeout(std::time::Duration::from_secs(2))
        .assert()
        .interrupted()
        .stdout(predicate::str::contains(r#""state":"live""#))
        .stdout(predicate::str::contains(r#""mode":"camera""#));
}

#[tokio::test]
async fn test_control_without_session_suggests_login() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/official/release"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "unauthenticated" })))
        .mount(&server)
        .await;

    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .env("LANESYNC_BASE_URL", server.uri())
        .arg("release")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("lanesync login"));
}

#[tokio::test]
async fn test_takeover_as_user_stops_before_request() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    store_session(&home, "user-token", "user");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/official/takeover"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(0)
        .mount(&server)
        .await;

    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .env("LANESYNC_BASE_URL", server.uri())
        .args(["takeover", "--lane", "2", "--duration", "30"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires an official account"));
}

#[tokio::test]
async fn test_backend_forbidden_is_explained() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    store_session(&home, "stale-official", "official");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/logs"))
        .and(header("authorization", "Bearer stale-official"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "error": "forbidden" })))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .env("LANESYNC_BASE_URL", server.uri())
        .arg("logs")
        .assert()
        .failure()
        .stderr(predicate::str::contains("HTTP 403: forbidden (requires an official account)"));
}

#[tokio::test]
async fn test_alerts_list_and_ack() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    store_session(&home, "official-token", "official");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "lane": 2, "msg": "Lane 3 at MAX_GREEN for prolonged period", "ts": 1_700_000_000.0, "ack": false }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/alerts/ack"))
        .and(body_json(json!({ "lane": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .env("LANESYNC_BASE_URL", server.uri())
        .arg("alerts")
        .assert()
        .success()
        .stdout(predicate::str::contains("Lane 3  [open]  Lane 3 at MAX_GREEN"));

    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .env("LANESYNC_BASE_URL", server.uri())
        .args(["alerts", "ack", "--lane", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Alerts for Lane 3 acknowledged."));
}

#[tokio::test]
async fn test_mode_and_pedestrian_as_user() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    store_session(&home, "user-token", "user");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/set_mode"))
        .and(header("authorization", "Bearer user-token"))
        .and(body_json(json!({ "mock": true })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "status": "ok", "mock": true })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/pedestrian"))
        .and(body_json(json!({ "lane": 0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "lane": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .env("LANESYNC_BASE_URL", server.uri())
        .args(["mode", "mock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Detection source is now mock."));

    cargo_bin_cmd!("lanesync")
        .env("LANESYNC_HOME", home.path())
        .env("LANESYNC_BASE_URL", server.uri())
        .args(["pedestrian", "--lane", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pedestrian crossing requested for Lane 1."));
}
