//! SQLite repository behaviour the scheduler relies on
//!
//! Each test gets its own database file in a temp dir.

use chrono::{Duration, Utc};
use libsocialbuffer::commands::{CreatePost, CreateSocialAccount, DeletePost, PublishPost};
use libsocialbuffer::config::DatabaseConfig;
use libsocialbuffer::db::{MetricsSnapshot, PostFilter};
use libsocialbuffer::types::{NewPost, PostMetrics};
use libsocialbuffer::{BufferService, Config, Database, Post, PostStatus, Repository};
use tempfile::TempDir;

async fn setup_service() -> (BufferService, TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("buffer.db");
    let db_path = db_path.to_str().unwrap().to_string();

    let config = Config {
        database: DatabaseConfig {
            path: db_path.clone(),
        },
        ..Default::default()
    };
    let service = BufferService::from_config(config).await.unwrap();
    (service, temp_dir, db_path)
}

async fn connect_account(service: &BufferService, external_id: &str) -> i64 {
    service
        .accounts()
        .connect(CreateSocialAccount {
            user_id: 1,
            platform: "pinterest".to_string(),
            external_id: external_id.to_string(),
            access_token: "token".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_claim_is_compare_and_swap_across_handles() {
    let (_service, _temp_dir, db_path) = setup_service().await;
    let first = Database::new(&db_path).await.unwrap();
    let second = Database::new(&db_path).await.unwrap();

    let created = Utc::now() - Duration::hours(1);
    let post = Post::create_at(
        NewPost {
            user_id: 1,
            content: "claim me".to_string(),
            social_account_ids: vec![1],
            scheduled_at: Some(created + Duration::minutes(5)),
            ..Default::default()
        },
        created,
    )
    .unwrap();
    first.create_post(&post).await.unwrap();

    // Both handles see the post as due
    assert_eq!(first.find_due_posts(Utc::now(), 10).await.unwrap().len(), 1);
    assert_eq!(second.find_due_posts(Utc::now(), 10).await.unwrap().len(), 1);

    let won = first
        .transition_status(post.id(), PostStatus::Scheduled, PostStatus::Publishing)
        .await
        .unwrap();
    let lost = second
        .transition_status(post.id(), PostStatus::Scheduled, PostStatus::Publishing)
        .await
        .unwrap();
    assert!(won);
    assert!(!lost);

    assert!(second.find_due_posts(Utc::now(), 10).await.unwrap().is_empty());
    let stored = second.find_post(post.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), PostStatus::Publishing);
}

#[tokio::test]
async fn test_delete_cascades_to_owned_rows() {
    let (service, _temp_dir, db_path) = setup_service().await;
    let account_id = connect_account(&service, "board-1").await;

    let post = service
        .posting()
        .create(CreatePost {
            user_id: 1,
            social_account_ids: vec![account_id],
            content: "Pin of the day".to_string(),
            post_type: "image".to_string(),
            media_urls: vec!["https://cdn.example.com/pin.jpg".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();

    let outcome = service
        .publishing()
        .publish(PublishPost::new(post.id(), 1))
        .await
        .unwrap();
    assert!(outcome.success);
    service
        .posting()
        .update_metrics(
            post.id(),
            PostMetrics {
                likes: 3,
                impressions: 40,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let db = Database::new(&db_path).await.unwrap();
    assert_eq!(db.list_publish_records(post.id()).await.unwrap().len(), 1);
    assert_eq!(db.list_metrics_snapshots(post.id()).await.unwrap().len(), 1);

    service
        .posting()
        .delete(DeletePost::new(post.id(), 1))
        .await
        .unwrap();

    assert!(db.find_post(post.id()).await.unwrap().is_none());
    assert!(db.list_publish_records(post.id()).await.unwrap().is_empty());
    assert!(db.list_metrics_snapshots(post.id()).await.unwrap().is_empty());
    // The account itself is not owned by the post
    assert!(db.find_account(account_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_sweeps_publish_once() {
    let (service, _temp_dir, db_path) = setup_service().await;
    let account_id = connect_account(&service, "board-2").await;

    let db = Database::new(&db_path).await.unwrap();
    let created = Utc::now() - Duration::hours(1);
    let post = Post::create_at(
        NewPost {
            user_id: 1,
            content: "Overdue pin".to_string(),
            social_account_ids: vec![account_id],
            scheduled_at: Some(created + Duration::minutes(10)),
            ..Default::default()
        },
        created,
    )
    .unwrap();
    db.create_post(&post).await.unwrap();

    let now = Utc::now();
    let scheduler = service.scheduler();
    let (a, b) = tokio::join!(scheduler.sweep(now), scheduler.sweep(now));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.published.len() + b.published.len(), 1);

    let records = db.list_publish_records(post.id()).await.unwrap();
    assert_eq!(records.len(), 1);
    let stored = db.find_post(post.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), PostStatus::Published);
}

#[tokio::test]
async fn test_metrics_history_is_kept() {
    let (service, _temp_dir, db_path) = setup_service().await;
    let account_id = connect_account(&service, "board-3").await;
    let post = service
        .posting()
        .create(CreatePost {
            user_id: 1,
            social_account_ids: vec![account_id],
            content: "Tracked".to_string(),
            post_type: "text".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let db = Database::new(&db_path).await.unwrap();
    for likes in [1, 5, 9] {
        db.record_metrics_snapshot(&MetricsSnapshot {
            post_id: post.id(),
            metrics: PostMetrics {
                likes,
                ..Default::default()
            },
            recorded_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    let history = db.list_metrics_snapshots(post.id()).await.unwrap();
    let likes: Vec<u64> = history.iter().map(|s| s.metrics.likes).collect();
    assert_eq!(likes, vec![1, 5, 9]);

    let posts = db.list_posts(&PostFilter::for_user(1)).await.unwrap();
    assert_eq!(posts.len(), 1);
}
