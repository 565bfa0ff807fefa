use indoc::formatdoc;
use integration_tests::TestServer;
use serde_json::json;

#[tokio::test]
async fn file_backend_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("usage.json");

    let config = formatdoc! {r#"
        [storage]
        type = "file"
        path = "{}"
    "#, path.display()};

    let server = TestServer::start(&config).await;

    for _ in 0..5 {
        server.client.record("persistent-client").await;
    }

    let grant = json!({
        "clientId": "persistent-client",
        "entitlement": { "type": "credits", "creditsRemaining": 15 },
    });

    server.client.post_json("/api/entitlements", &grant).await;
    server.shutdown().await;

    let contents: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(contents["clients"]["persistent-client"]["count"], 5);

    let server = TestServer::start(&config).await;
    let usage = server.client.usage("persistent-client").await;

    insta::assert_json_snapshot!(usage, @r#"
    {
      "count": 5,
      "entitlement": {
        "creditsRemaining": 15,
        "type": "credits"
      },
      "isLimitReached": false,
      "isPremium": true,
      "limit": 25,
      "remaining": 20
    }
    "#);
}

#[tokio::test]
async fn file_backend_counts_concurrent_calls() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usage.json");

    let config = formatdoc! {r#"
        [storage]
        type = "file"
        path = "{}"
    "#, path.display()};

    let server = TestServer::start(&config).await;

    let mut tasks = Vec::new();

    for _ in 0..50 {
        let client = server.client.clone();
        tasks.push(tokio::spawn(async move { client.record("busy-file-client").await }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(server.client.usage("busy-file-client").await["count"], 50);
}

#[tokio::test]
async fn unreachable_redis_fails_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("meter.toml");

    let config = formatdoc! {r#"
        [storage]
        type = "redis"
        url = "redis://127.0.0.1:1"
    "#};

    std::fs::write(&config_path, config).unwrap();
    let config = config::Config::load(&config_path).unwrap();

    let result = server::serve(server::ServeConfig {
        listen_address: "127.0.0.1:0".parse().unwrap(),
        config,
        shutdown_signal: tokio_util::sync::CancellationToken::new(),
        log_filter: "info".to_string(),
    })
    .await;

    assert!(matches!(result, Err(server::Error::Storage(_))), "{result:?}");
}
