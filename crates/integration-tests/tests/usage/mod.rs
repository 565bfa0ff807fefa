use indoc::indoc;
use integration_tests::TestServer;

#[tokio::test]
async fn fresh_client_gets_the_free_tier() {
    let server = TestServer::start("").await;

    let usage = server.client.usage("fresh-client-1").await;

    insta::assert_json_snapshot!(usage, @r#"
    {
      "count": 0,
      "entitlement": null,
      "isLimitReached": false,
      "isPremium": false,
      "limit": 10,
      "remaining": 10
    }
    "#);
}

#[tokio::test]
async fn ten_calls_exhaust_the_free_tier() {
    let server = TestServer::start("").await;

    for call in 1..=10 {
        let usage = server.client.record("ten-calls-client").await;
        assert_eq!(usage["count"], call);
    }

    let usage = server.client.usage("ten-calls-client").await;

    insta::assert_json_snapshot!(usage, @r#"
    {
      "count": 10,
      "entitlement": null,
      "isLimitReached": true,
      "isPremium": false,
      "limit": 10,
      "remaining": 0
    }
    "#);
}

#[tokio::test]
async fn reading_usage_does_not_count() {
    let server = TestServer::start("").await;

    for _ in 0..3 {
        server.client.record("read-only-client").await;
    }

    let first = server.client.usage("read-only-client").await;

    for _ in 0..10 {
        assert_eq!(server.client.usage("read-only-client").await, first);
    }

    assert_eq!(first["count"], 3);
    assert_eq!(first["remaining"], 7);
}

#[tokio::test]
async fn recording_past_the_limit_keeps_counting() {
    let server = TestServer::start("").await;

    for _ in 0..12 {
        server.client.record("over-limit-client").await;
    }

    let usage = server.client.usage("over-limit-client").await;

    assert_eq!(usage["count"], 12);
    assert_eq!(usage["remaining"], 0);
    assert_eq!(usage["isLimitReached"], true);
}

#[tokio::test]
async fn configured_free_limit() {
    let config = indoc! {r#"
        [quota]
        free_limit = 3
    "#};

    let server = TestServer::start(config).await;

    let usage = server.client.record("small-quota-client").await;

    assert_eq!(usage["limit"], 3);
    assert_eq!(usage["remaining"], 2);
}

#[tokio::test]
async fn concurrent_recording_loses_no_calls() {
    let server = TestServer::start("").await;

    let mut tasks = Vec::new();

    for _ in 0..50 {
        let client = server.client.clone();
        tasks.push(tokio::spawn(async move { client.record("concurrent-client").await }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    let usage = server.client.usage("concurrent-client").await;
    assert_eq!(usage["count"], 50);
}

#[tokio::test]
async fn missing_client_id() {
    let server = TestServer::start("").await;

    let response = server.client.get("/api/usage").await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 400);
    insta::assert_json_snapshot!(body, @r#"
    {
      "code": "MISSING_PARAMS",
      "error": "Missing required parameter: clientId",
      "success": false
    }
    "#);
}

#[tokio::test]
async fn invalid_client_id() {
    let server = TestServer::start("").await;

    for client_id in ["short", "has%20spaces%20in%20it", "semicolons;are;not;allowed"] {
        let response = server.client.post(&format!("/api/usage?clientId={client_id}")).await;
        let (status, body) = server.client.json(response).await;

        assert_eq!(status, 400, "{client_id}");
        assert_eq!(body["code"], "INVALID_PARAMS", "{client_id}");
    }
}

#[tokio::test]
async fn health_reports_the_store() {
    let server = TestServer::start("").await;

    server.client.record("health-client-1").await;

    let response = server.client.get("/health").await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 200);
    insta::assert_json_snapshot!(body, @r#"
    {
      "stats": {
        "totalClients": 1,
        "totalPremiumClients": 0,
        "totalUsage": 1
      },
      "status": "healthy"
    }
    "#);
}

#[tokio::test]
async fn health_on_a_custom_path() {
    let config = indoc! {r#"
        [server.health]
        path = "/healthz"
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/healthz").await.status(), 200);
    assert_eq!(server.client.get("/health").await.status(), 404);
}

#[tokio::test]
async fn health_disabled() {
    let config = indoc! {r#"
        [server.health]
        enabled = false
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/health").await.status(), 404);
}
