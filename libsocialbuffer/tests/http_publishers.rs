//! Live publishers against a local `wiremock` server
//!
//! Covers the request each publisher sends and how HTTP status codes map
//! onto transient and permanent platform errors.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use libsocialbuffer::commands::{CreatePost, PublishPost};
use libsocialbuffer::config::{PlatformConfig, PublisherMode};
use libsocialbuffer::platforms::linkedin::LinkedInPublisher;
use libsocialbuffer::platforms::twitter::TwitterPublisher;
use libsocialbuffer::platforms::{PublisherFactory, Publisher};
use libsocialbuffer::{
    BufferError, BufferService, Config, FailureKind, MemoryRepository, Platform, PlatformError,
    Post, PostStatus, Repository, SocialAccount,
};

fn account(platform: Platform, external_id: &str) -> SocialAccount {
    SocialAccount {
        id: 7,
        user_id: 1,
        platform,
        external_id: external_id.to_string(),
        display_name: None,
        access_token: "test-token".to_string(),
        connected: true,
        token_expires_at: None,
        created_at: Utc::now(),
    }
}

fn tweet() -> Post {
    Post::text(1, "Hello from the test suite", vec![7]).unwrap()
}

async fn twitter_error(status: u16, body: serde_json::Value) -> BufferError {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/tweets"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;

    let publisher = TwitterPublisher::new(Some(&server.uri()), Duration::from_secs(5)).unwrap();
    publisher
        .publish(&tweet(), &account(Platform::Twitter, "tw-7"))
        .await
        .unwrap_err()
}

#[tokio::test]
async fn twitter_publish_sends_bearer_token_and_returns_tweet_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/tweets"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({ "text": "Hello from the test suite" })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "data": { "id": "1790000000000" } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let publisher = TwitterPublisher::new(Some(&server.uri()), Duration::from_secs(5)).unwrap();
    let published = publisher
        .publish(&tweet(), &account(Platform::Twitter, "tw-7"))
        .await
        .unwrap();

    assert_eq!(published.platform_post_id, "1790000000000");
    assert!(published.raw_response.is_some());
}

#[tokio::test]
async fn unauthorized_is_permanent_authentication_error() {
    let err = twitter_error(401, json!({ "detail": "Unauthorized" })).await;
    assert!(matches!(
        err,
        BufferError::Platform(PlatformError::Authentication(ref message)) if message.contains("Unauthorized")
    ));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn rate_limit_is_transient() {
    let err = twitter_error(429, json!({ "title": "Too Many Requests" })).await;
    assert!(matches!(err, BufferError::Platform(PlatformError::RateLimit(_))));
    assert!(err.is_transient());
}

#[tokio::test]
async fn server_error_is_transient_network_error() {
    let err = twitter_error(503, json!({ "error": "upstream unavailable" })).await;
    assert!(matches!(err, BufferError::Platform(PlatformError::Network(_))));
    assert!(err.is_transient());
}

#[tokio::test]
async fn unprocessable_is_permanent_validation_error() {
    let err = twitter_error(
        422,
        json!({ "error": { "message": "duplicate content" } }),
    )
    .await;
    assert!(matches!(
        err,
        BufferError::Platform(PlatformError::Validation(ref message)) if message.contains("duplicate content")
    ));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn missing_id_in_success_response_is_posting_error() {
    let err = twitter_error(200, json!({ "data": {} })).await;
    assert!(matches!(err, BufferError::Platform(PlatformError::Posting(_))));
}

#[tokio::test]
async fn slow_platform_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/tweets"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "data": { "id": "1" } }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let publisher =
        TwitterPublisher::new(Some(&server.uri()), Duration::from_millis(200)).unwrap();
    let err = publisher
        .publish(&tweet(), &account(Platform::Twitter, "tw-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, BufferError::Platform(PlatformError::Timeout(_))));
    assert!(err.is_transient());
}

#[tokio::test]
async fn linkedin_posts_ugc_as_the_member() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/ugcPosts"))
        .and(body_partial_json(json!({ "author": "urn:li:person:abc" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "urn:li:share:99" })))
        .expect(1)
        .mount(&server)
        .await;

    let publisher = LinkedInPublisher::new(Some(&server.uri()), Duration::from_secs(5)).unwrap();
    let post = Post::text(1, "Hiring!", vec![7]).unwrap();
    let published = publisher
        .publish(&post, &account(Platform::LinkedIn, "urn:li:person:abc"))
        .await
        .unwrap();
    assert_eq!(published.platform_post_id, "urn:li:share:99");
}

#[tokio::test]
async fn live_publish_failure_flows_into_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/tweets"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.platforms.insert(
        "twitter".to_string(),
        PlatformConfig {
            mode: PublisherMode::Live,
            api_base: Some(server.uri()),
            max_concurrency: 1,
        },
    );
    let factory = PublisherFactory::from_config(&config).unwrap();
    let repo = Arc::new(MemoryRepository::new());
    let service = BufferService::with_repository(repo.clone(), config, factory);

    let account_id = repo
        .create_account(&SocialAccount {
            id: 0,
            ..account(Platform::Twitter, "tw-live")
        })
        .await
        .unwrap();
    let post = service
        .posting()
        .create(CreatePost {
            user_id: 1,
            social_account_ids: vec![account_id],
            content: "Live path".to_string(),
            post_type: "text".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let outcome = service
        .publishing()
        .publish(PublishPost::new(post.id(), 1))
        .await
        .unwrap();

    assert_eq!(outcome.status, PostStatus::Failed);
    assert!(outcome.retry_eligible);
    assert_eq!(outcome.results[0].error_kind, Some(FailureKind::Transient));
    assert!(outcome.results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("HTTP 429")));
}
