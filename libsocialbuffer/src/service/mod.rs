//! Service layer for SocialBuffer
//!
//! `BufferService` is the entry point. It owns the shared resources (the
//! repository, configuration and event bus) and hands out the specialized
//! sub-services:
//!
//! - `PostingService`: create, edit, schedule, cancel, delete and query posts
//! - `PublishingService`: claim a post and fan it out to its accounts
//! - `AccountService`: connected social accounts
//! - `Scheduler`: the due-post and retry sweep
//! - `EventBus`: domain event distribution
//!
//! # Example
//!
//! ```no_run
//! use libsocialbuffer::commands::{CreatePost, PublishPost};
//! use libsocialbuffer::service::BufferService;
//!
//! # async fn example() -> libsocialbuffer::Result<()> {
//! let service = BufferService::new().await?;
//!
//! let post = service
//!     .posting()
//!     .create(CreatePost {
//!         user_id: 1,
//!         social_account_ids: vec![1],
//!         content: "Launch day!".to_string(),
//!         post_type: "text".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! let outcome = service
//!     .publishing()
//!     .publish(PublishPost::new(post.id(), 1))
//!     .await?;
//! println!("Published to {} accounts", outcome.succeeded_count());
//! # Ok(())
//! # }
//! ```

pub mod accounts;
pub mod events;
pub mod posting;
pub mod publishing;
pub mod validation;

use std::sync::Arc;

use uuid::Uuid;

use self::accounts::AccountService;
use self::events::{EventBus, EventReceiver};
use self::posting::PostingService;
use self::publishing::PublishingService;
use crate::config::{resolve_db_path, Config};
use crate::db::{Database, Repository};
use crate::error::{BufferError, ConfigError, Result};
use crate::platforms::PublisherFactory;
use crate::poster::MultiAccountPoster;
use crate::scheduling::Scheduler;
use crate::types::Post;

/// Main service facade
///
/// All sub-services share one `Arc<dyn Repository>` and one `Arc<Config>`,
/// and emit on the same [`EventBus`].
///
/// # Example
///
/// ```no_run
/// use libsocialbuffer::service::BufferService;
///
/// # async fn example() -> libsocialbuffer::Result<()> {
/// let service = BufferService::new().await?;
///
/// let posting = service.posting();
/// let accounts = service.accounts();
/// let mut events = service.subscribe();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BufferService {
    config: Arc<Config>,
    repo: Arc<dyn Repository>,
    posting: PostingService,
    publishing: PublishingService,
    accounts: AccountService,
    scheduler: Scheduler,
    event_bus: EventBus,
}

impl BufferService {
    /// Create a service from the default configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration cannot be loaded
    /// - The database cannot be opened or migrated
    /// - A live publisher cannot be built
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service backed by the SQLite database `config` points to.
    pub async fn from_config(config: Config) -> Result<Self> {
        let db_path = resolve_db_path(&config.database.path);
        let db_path_str = db_path.to_str().ok_or_else(|| {
            BufferError::from(ConfigError::InvalidValue {
                field: "database.path".to_string(),
                message: "path is not valid UTF-8".to_string(),
            })
        })?;
        let db = Database::new(db_path_str).await?;
        tracing::debug!(path = %db_path.display(), "Database ready");

        let factory = PublisherFactory::from_config(&config)?;
        Ok(Self::with_repository(Arc::new(db), config, factory))
    }

    /// Assemble a service over any repository and publisher set.
    ///
    /// Tests use this with `MemoryRepository` and mock publishers.
    pub fn with_repository(
        repo: Arc<dyn Repository>,
        config: Config,
        factory: PublisherFactory,
    ) -> Self {
        let config = Arc::new(config);
        let event_bus = EventBus::new(config.publishing.event_capacity);
        let poster = MultiAccountPoster::new(factory, &config);

        let posting = PostingService::new(Arc::clone(&repo), Arc::clone(&config), event_bus.clone());
        let publishing = PublishingService::new(
            Arc::clone(&repo),
            Arc::clone(&config),
            poster,
            event_bus.clone(),
        );
        let accounts = AccountService::new(Arc::clone(&repo));
        let scheduler = Scheduler::new(Arc::clone(&repo), &config, publishing.clone());

        Self {
            config,
            repo,
            posting,
            publishing,
            accounts,
            scheduler,
            event_bus,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying store, for read paths the sub-services do not cover.
    pub fn repository(&self) -> &dyn Repository {
        self.repo.as_ref()
    }

    pub fn posting(&self) -> &PostingService {
        &self.posting
    }

    pub fn publishing(&self) -> &PublishingService {
        &self.publishing
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Subscribe to domain events
    ///
    /// Each receiver sees every event emitted after it subscribed.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }
}

/// Load a post the caller owns. Someone else's post is reported as missing.
pub(crate) async fn load_owned(repo: &dyn Repository, post_id: Uuid, user_id: i64) -> Result<Post> {
    match repo.find_post(post_id).await? {
        Some(post) if post.is_owned_by(user_id) => Ok(post),
        _ => Err(BufferError::NotFound(format!("post {}", post_id))),
    }
}
