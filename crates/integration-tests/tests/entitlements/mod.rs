use integration_tests::TestServer;
use jiff::{SignedDuration, Timestamp};
use serde_json::json;

fn in_days(days: i64) -> String {
    (Timestamp::now() + SignedDuration::from_hours(24 * days)).to_string()
}

#[tokio::test]
async fn subscription_lifts_the_limit() {
    let server = TestServer::start("").await;

    for _ in 0..10 {
        server.client.record("subscriber-1").await;
    }

    let expires_at = in_days(30);

    let grant = json!({
        "clientId": "subscriber-1",
        "entitlement": { "type": "subscription", "expiresAt": expires_at },
    });

    let response = server.client.post_json("/api/entitlements", &grant).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["isPremium"], true);

    let usage = server.client.record("subscriber-1").await;

    insta::assert_json_snapshot!(usage, { ".entitlement.expiresAt" => "[timestamp]" }, @r#"
    {
      "count": 11,
      "entitlement": {
        "expiresAt": "[timestamp]",
        "type": "subscription",
        "unlimited": true
      },
      "isLimitReached": false,
      "isPremium": true,
      "limit": null,
      "remaining": null
    }
    "#);
}

#[tokio::test]
async fn credits_raise_the_limit() {
    let server = TestServer::start("").await;

    let grant = json!({
        "clientId": "credits-client",
        "entitlement": { "type": "credits", "creditsRemaining": 50 },
    });

    let response = server.client.post_json("/api/entitlements", &grant).await;
    assert_eq!(response.status(), 200);

    for _ in 0..12 {
        server.client.record("credits-client").await;
    }

    let usage = server.client.usage("credits-client").await;

    insta::assert_json_snapshot!(usage, @r#"
    {
      "count": 12,
      "entitlement": {
        "creditsRemaining": 50,
        "type": "credits"
      },
      "isLimitReached": false,
      "isPremium": true,
      "limit": 60,
      "remaining": 48
    }
    "#);
}

#[tokio::test]
async fn expired_subscription_falls_back_to_the_free_tier() {
    let server = TestServer::start("").await;

    let grant = json!({
        "clientId": "lapsed-subscriber",
        "entitlement": { "type": "subscription", "expiresAt": in_days(-1) },
    });

    let response = server.client.post_json("/api/entitlements", &grant).await;
    assert_eq!(response.status(), 200);

    let usage = server.client.usage("lapsed-subscriber").await;

    assert_eq!(usage["isPremium"], false);
    assert_eq!(usage["limit"], 10);
    assert_eq!(usage["entitlement"], serde_json::Value::Null);
}

#[tokio::test]
async fn latest_grant_wins() {
    let server = TestServer::start("").await;

    for credits in [10, 25] {
        let grant = json!({
            "clientId": "regranted-client",
            "entitlement": { "type": "credits", "creditsRemaining": credits },
        });

        let response = server.client.post_json("/api/entitlements", &grant).await;
        assert_eq!(response.status(), 200);
    }

    let usage = server.client.usage("regranted-client").await;
    assert_eq!(usage["limit"], 35);
}

#[tokio::test]
async fn revoke_keeps_the_count() {
    let server = TestServer::start("").await;

    let grant = json!({
        "clientId": "revoked-client",
        "entitlement": { "type": "credits", "creditsRemaining": 5 },
    });

    server.client.post_json("/api/entitlements", &grant).await;

    for _ in 0..3 {
        server.client.record("revoked-client").await;
    }

    let response = server.client.delete("/api/entitlements?clientId=revoked-client").await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["count"], 3);
    assert_eq!(body["data"]["isPremium"], false);
    assert_eq!(body["data"]["limit"], 10);
}

#[tokio::test]
async fn grant_requires_an_entitlement() {
    let server = TestServer::start("").await;

    let response = server
        .client
        .post_json("/api/entitlements", &json!({ "clientId": "incomplete-grant" }))
        .await;

    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 400);
    assert_eq!(body["code"], "MISSING_PARAMS");
    assert_eq!(body["error"], "Missing required parameter: entitlement");
}

#[tokio::test]
async fn grant_rejects_unknown_entitlement_types() {
    let server = TestServer::start("").await;

    let grant = json!({
        "clientId": "odd-grant-client",
        "entitlement": { "type": "lifetime" },
    });

    let response = server.client.post_json("/api/entitlements", &grant).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 400);
    assert_eq!(body["code"], "INVALID_PARAMS");
}
