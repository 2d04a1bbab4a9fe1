use std::collections::HashMap;

use httpmock::prelude::*;
use qguardarr_client::{QbittorrentClient, ReqwestQbittorrentClient};
use qguardarr_config::QbittorrentSettings;
use serde_json::json;

fn settings_for(server: &MockServer) -> QbittorrentSettings {
    QbittorrentSettings {
        host: server.host(),
        port: server.port(),
        username: "admin".to_string(),
        password: "adminadmin".to_string(),
        timeout_secs: 5,
    }
}

#[tokio::test]
async fn get_torrents_authenticates_then_resolves_trackers() {
    let server = MockServer::start_async().await;

    let login = server.mock(|when, then| {
        when.method(POST).path("/api/v2/auth/login");
        then.status(200).body("Ok.");
    });

    let info = server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/info");
        then.status(200).json_body(json!([
            {
                "hash": "abc123",
                "name": "demo",
                "state": "uploading",
                "upspeed": 50_000,
                "num_seeds": 3,
                "num_leechs": 1,
                "ratio": 1.2,
                "category": "",
                "tags": "",
                "last_activity": 0
            }
        ]));
    });

    let trackers = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v2/torrents/trackers")
            .query_param("hash", "abc123");
        then.status(200).json_body(json!([
            { "url": "**[DHT]**", "status": 0 },
            { "url": "https://tracker.example/announce", "status": 2 }
        ]));
    });

    let client = ReqwestQbittorrentClient::new(settings_for(&server)).expect("client build");
    let torrents = client.get_torrents(false).await.expect("get_torrents succeeds");

    assert_eq!(torrents.len(), 1);
    assert_eq!(torrents[0].tracker, "https://tracker.example/announce");
    login.assert();
    info.assert();
    trackers.assert();
}

#[tokio::test]
async fn session_expiry_triggers_single_reauth_retry() {
    let server = MockServer::start_async().await;

    let login = server.mock(|when, then| {
        when.method(POST).path("/api/v2/auth/login");
        then.status(200).body("Ok.");
    });

    let expired = server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/properties");
        then.status(403);
    });

    let client = ReqwestQbittorrentClient::new(settings_for(&server)).expect("client build");
    let result = client.get_torrent_upload_limit("abc123").await;

    assert!(result.is_err());
    assert_eq!(login.hits_async().await, 2);
    assert_eq!(expired.hits_async().await, 2);
}

#[tokio::test]
async fn upload_limits_are_grouped_and_batched() {
    let server = MockServer::start_async().await;

    server.mock(|when, then| {
        when.method(POST).path("/api/v2/auth/login");
        then.status(200).body("Ok.");
    });

    let set_limit = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v2/torrents/setUploadLimit")
            .body_contains("limit=50000");
        then.status(200);
    });

    let client = ReqwestQbittorrentClient::new(settings_for(&server)).expect("client build");
    let mut limits = HashMap::new();
    limits.insert("hash-a".to_string(), 50_000_i64);
    limits.insert("hash-b".to_string(), 50_000_i64);

    client.set_upload_limits_batch(&limits).await.expect("batch set succeeds");
    set_limit.assert();
}
