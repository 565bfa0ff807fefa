use integration_tests::TestServer;
use serde_json::json;

#[tokio::test]
async fn usage_and_entitlement_move_to_the_new_id() {
    let server = TestServer::start("").await;

    for _ in 0..4 {
        server.client.record("previous-id-1").await;
    }

    for _ in 0..2 {
        server.client.record("current-id-1").await;
    }

    let grant = json!({
        "clientId": "previous-id-1",
        "entitlement": { "type": "credits", "creditsRemaining": 20 },
    });

    server.client.post_json("/api/entitlements", &grant).await;

    let request = json!({ "oldClientId": "previous-id-1", "newClientId": "current-id-1" });
    let response = server.client.post_json("/api/migrations", &request).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 200, "{body}");
    insta::assert_json_snapshot!(body, @r#"
    {
      "data": {
        "count": 6,
        "entitlement": {
          "creditsRemaining": 20,
          "type": "credits"
        },
        "status": "migrated"
      },
      "success": true
    }
    "#);

    let current = server.client.usage("current-id-1").await;
    assert_eq!(current["count"], 6);
    assert_eq!(current["limit"], 30);

    let previous = server.client.usage("previous-id-1").await;
    assert_eq!(previous["count"], 4);
    assert_eq!(previous["isPremium"], false);
}

#[tokio::test]
async fn repeating_a_migration_does_not_count_twice() {
    let server = TestServer::start("").await;

    for _ in 0..3 {
        server.client.record("repeated-old-1").await;
    }

    let request = json!({ "oldClientId": "repeated-old-1", "newClientId": "repeated-new-1" });

    let response = server.client.post_json("/api/migrations", &request).await;
    let (status, body) = server.client.json(response).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["count"], 3);

    let response = server.client.post_json("/api/migrations", &request).await;
    let (status, body) = server.client.json(response).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["status"], "nothingToMigrate");

    assert_eq!(server.client.usage("repeated-new-1").await["count"], 3);
    assert_eq!(server.client.usage("repeated-old-1").await["count"], 3);
}

#[tokio::test]
async fn nothing_to_migrate() {
    let server = TestServer::start("").await;

    let request = json!({ "oldClientId": "never-seen-id", "newClientId": "current-id-2" });
    let response = server.client.post_json("/api/migrations", &request).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "nothingToMigrate");

    let current = server.client.usage("current-id-2").await;
    assert_eq!(current["count"], 0);
}

#[tokio::test]
async fn migrating_onto_itself_is_a_no_op() {
    let server = TestServer::start("").await;

    server.client.record("same-id-client").await;

    let request = json!({ "oldClientId": "same-id-client", "newClientId": "same-id-client" });
    let response = server.client.post_json("/api/migrations", &request).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "nothingToMigrate");
    assert_eq!(server.client.usage("same-id-client").await["count"], 1);
}

#[tokio::test]
async fn both_ids_must_be_valid() {
    let server = TestServer::start("").await;

    let request = json!({ "oldClientId": "previous-id-3", "newClientId": "bad id" });
    let response = server.client.post_json("/api/migrations", &request).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 400);
    assert_eq!(body["code"], "INVALID_PARAMS");

    let request = json!({ "oldClientId": "previous-id-3" });
    let response = server.client.post_json("/api/migrations", &request).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 400);
    assert_eq!(body["code"], "MISSING_PARAMS");
}
