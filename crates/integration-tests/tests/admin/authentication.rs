use integration_tests::TestServer;
use serde_json::json;

#[tokio::test]
async fn usage_stays_public() {
    let server = TestServer::with_admin_key("").await;

    let usage = server.client.record("public-client").await;
    assert_eq!(usage["count"], 1);
}

#[tokio::test]
async fn missing_admin_key() {
    let server = TestServer::with_admin_key("").await;

    let response = server.client.get("/admin/stats").await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 401);
    insta::assert_json_snapshot!(body, @r#"
    {
      "code": "UNAUTHORIZED",
      "error": "Missing admin key",
      "success": false
    }
    "#);
}

#[tokio::test]
async fn wrong_admin_key() {
    let server = TestServer::with_admin_key("").await;

    let mut client = server.client.clone();
    client.push_header("x-admin-key", "not-the-admin-key");

    let grant = json!({
        "clientId": "sneaky-client",
        "entitlement": { "type": "credits", "creditsRemaining": 1000 },
    });

    let response = client.post_json("/api/entitlements", &grant).await;
    let (status, body) = client.json(response).await;

    assert_eq!(status, 403);
    assert_eq!(body["code"], "FORBIDDEN");

    let usage = server.client.usage("sneaky-client").await;
    assert_eq!(usage["isPremium"], false);
}

#[tokio::test]
async fn protected_routes() {
    let server = TestServer::with_admin_key("").await;

    let routes = [
        (reqwest::Method::POST, "/api/entitlements"),
        (reqwest::Method::DELETE, "/api/entitlements?clientId=some-client"),
        (reqwest::Method::POST, "/api/migrations"),
        (reqwest::Method::GET, "/admin/stats"),
        (reqwest::Method::GET, "/admin/export"),
        (reqwest::Method::POST, "/admin/import"),
        (reqwest::Method::POST, "/admin/cleanup"),
        (reqwest::Method::GET, "/admin/site-usage"),
        (reqwest::Method::PATCH, "/admin/site-usage"),
        (reqwest::Method::POST, "/admin/site-usage/reset"),
    ];

    for (method, path) in routes {
        let response = server.client.request(method.clone(), path).send().await.unwrap();
        assert_eq!(response.status(), 401, "{method} {path}");
    }
}

#[tokio::test]
async fn correct_admin_key() {
    let server = TestServer::with_admin_key("").await;
    let admin = server.client.with_admin_key();

    server.client.record("counted-client").await;

    let response = admin.get("/admin/stats").await;
    let (status, body) = admin.json(response).await;

    assert_eq!(status, 200);
    insta::assert_json_snapshot!(body, @r#"
    {
      "data": {
        "totalClients": 1,
        "totalPremiumClients": 0,
        "totalUsage": 1
      },
      "success": true
    }
    "#);
}

#[tokio::test]
async fn open_without_a_configured_key() {
    let server = TestServer::start("").await;

    let response = server.client.get("/admin/stats").await;
    assert_eq!(response.status(), 200);
}
