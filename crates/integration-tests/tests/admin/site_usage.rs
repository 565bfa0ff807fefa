use std::time::Duration;

use indoc::indoc;
use integration_tests::TestServer;
use jiff::{Timestamp, tz::TimeZone};
use serde_json::json;

fn current_period() -> String {
    Timestamp::now().to_zoned(TimeZone::UTC).strftime("%Y-%m").to_string()
}

#[tokio::test]
async fn starts_empty_with_the_configured_cap() {
    let config = indoc! {r#"
        [site]
        max_limit = 250
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.get("/admin/site-usage").await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["period"], current_period());
    assert_eq!(body["data"]["totalCount"], 0);
    assert_eq!(body["data"]["maxLimit"], 250);
    assert_eq!(body["data"]["isLimitReached"], false);
}

#[tokio::test]
async fn recorded_calls_reach_the_aggregate() {
    let server = TestServer::start("").await;

    for _ in 0..3 {
        server.client.record("site-counted-client").await;
    }

    // The aggregate is updated in the background.
    let mut total = 0;

    for _ in 0..50 {
        let response = server.client.get("/admin/site-usage").await;
        let (_, body) = server.client.json(response).await;
        total = body["data"]["totalCount"].as_u64().unwrap();

        if total == 3 {
            break;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(total, 3);
}

#[tokio::test]
async fn update_and_reset() {
    let server = TestServer::start("").await;

    let response = server.client.patch_json("/admin/site-usage", &json!({ "maxLimit": 1 })).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["maxLimit"], 1);

    server.client.record("site-capped-client").await;

    let mut reached = false;

    for _ in 0..50 {
        let response = server.client.get("/admin/site-usage").await;
        let (_, body) = server.client.json(response).await;
        reached = body["data"]["isLimitReached"].as_bool().unwrap();

        if reached {
            break;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(reached);

    let response = server.client.post("/admin/site-usage/reset").await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["totalCount"], 0);
    assert_eq!(body["data"]["isLimitReached"], false);
}

#[tokio::test]
async fn cap_must_be_positive() {
    let server = TestServer::start("").await;

    let response = server.client.patch_json("/admin/site-usage", &json!({})).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 400);
    assert_eq!(body["code"], "MISSING_PARAMS");

    let response = server.client.patch_json("/admin/site-usage", &json!({ "maxLimit": 0 })).await;
    let (status, body) = server.client.json(response).await;

    assert_eq!(status, 400);
    assert_eq!(body["code"], "INVALID_PARAMS");
}
