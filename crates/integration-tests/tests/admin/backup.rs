use integration_tests::TestServer;
use serde_json::json;

#[tokio::test]
async fn export_then_import_into_another_server() {
    let source = TestServer::start("").await;

    for _ in 0..3 {
        source.client.record("exported-client").await;
    }

    let grant = json!({
        "clientId": "exported-client",
        "entitlement": { "type": "credits", "creditsRemaining": 7 },
    });

    source.client.post_json("/api/entitlements", &grant).await;

    let response = source.client.get("/admin/export").await;
    let (status, body) = source.client.json(response).await;
    assert_eq!(status, 200);

    let snapshot = body["data"].clone();
    assert_eq!(snapshot["clients"]["exported-client"]["count"], 3);

    let target = TestServer::start("").await;
    target.client.record("overwritten-client").await;

    let response = target.client.post_json("/admin/import", &snapshot).await;
    let (status, body) = target.client.json(response).await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["importedClients"], 1);

    let usage = target.client.usage("exported-client").await;
    assert_eq!(usage["count"], 3);
    assert_eq!(usage["limit"], 17);

    let response = target.client.get("/admin/stats").await;
    let (_, body) = target.client.json(response).await;
    assert_eq!(body["data"]["totalClients"], 1);
}

#[tokio::test]
async fn import_rejects_invalid_client_ids() {
    let server = TestServer::start("").await;

    server.client.record("surviving-client").await;

    let snapshot = json!({
        "clients": {
            "bad id": { "count": 1, "entitlement": null, "lastUpdated": "2026-01-01T00:00:00Z" }
        }
    });

    let response = server.client.post_json("/admin/import", &snapshot).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 400);
    assert_eq!(body["code"], "INVALID_PARAMS");

    assert_eq!(server.client.usage("surviving-client").await["count"], 1);
}

#[tokio::test]
async fn cleanup_purges_expired_subscriptions() {
    let server = TestServer::start("").await;

    let grants = [
        ("expired-sub-1", json!({ "type": "subscription", "expiresAt": "2020-01-01T00:00:00Z" })),
        ("expired-sub-2", json!({ "type": "subscription", "expiresAt": "2021-06-30T12:00:00Z" })),
        ("credit-holder", json!({ "type": "credits", "creditsRemaining": 3 })),
    ];

    for (client_id, entitlement) in grants {
        let grant = json!({ "clientId": client_id, "entitlement": entitlement });
        let response = server.client.post_json("/api/entitlements", &grant).await;
        assert_eq!(response.status(), 200);
    }

    let response = server.client.post("/admin/cleanup").await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["purgedEntitlements"], 2);

    let response = server.client.get("/admin/export").await;
    let (_, body) = server.client.json(response).await;

    assert_eq!(body["data"]["clients"]["expired-sub-1"]["entitlement"], serde_json::Value::Null);
    assert_eq!(body["data"]["clients"]["credit-holder"]["entitlement"]["creditsRemaining"], 3);
}
