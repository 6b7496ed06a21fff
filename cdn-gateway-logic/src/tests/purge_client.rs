use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{
    external::purge::{FastPurgeApi, PurgeClient},
    settings::Environment,
};

#[tokio::test]
async fn purge_posts_urls_to_the_delete_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ccu/v3/delete/url/production"))
        .and(body_partial_json(serde_json::json!({
            "objects": ["https://cdn.example.com/a", "https://cdn.example.com/b"]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "httpStatus": 201,
            "estimatedSeconds": 5,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let env = Environment {
        name: "test".to_string(),
        table: "t".to_string(),
        fastpurge_enabled: true,
        fastpurge_host: Some(server.uri()),
        ..Default::default()
    };

    let client = FastPurgeApi::new();
    client
        .purge_by_urls(
            &env,
            &[
                "https://cdn.example.com/a".to_string(),
                "https://cdn.example.com/b".to_string(),
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn purge_surfaces_http_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let env = Environment {
        name: "test".to_string(),
        table: "t".to_string(),
        fastpurge_host: Some(server.uri()),
        ..Default::default()
    };

    let result = FastPurgeApi::new()
        .purge_by_urls(&env, &["https://cdn.example.com/a".to_string()])
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn purge_without_host_is_a_validation_error() {
    let env = Environment {
        name: "test".to_string(),
        table: "t".to_string(),
        ..Default::default()
    };
    let result = FastPurgeApi::new()
        .purge_by_urls(&env, &["x".to_string()])
        .await;
    assert!(result.is_err());
}
