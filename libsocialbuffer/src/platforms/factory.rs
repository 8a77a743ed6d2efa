//! Registry resolving a [`Platform`] to its publisher
//!
//! The registry is closed: it is built once at startup and never changes.
//! Platforms that were not registered fail with `UnsupportedPlatform`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{Config, PublisherMode};
use crate::error::{BufferError, Result};
use crate::platforms::facebook::FacebookPublisher;
use crate::platforms::instagram::InstagramPublisher;
use crate::platforms::linkedin::LinkedInPublisher;
use crate::platforms::noop::NoOpPublisher;
use crate::platforms::pinterest::PinterestPublisher;
use crate::platforms::tiktok::TikTokPublisher;
use crate::platforms::twitter::TwitterPublisher;
use crate::platforms::youtube::YouTubePublisher;
use crate::platforms::Publisher;
use crate::types::Platform;

#[derive(Clone, Default)]
pub struct PublisherFactory {
    publishers: BTreeMap<Platform, Arc<dyn Publisher>>,
}

#[derive(Default)]
pub struct PublisherFactoryBuilder {
    publishers: BTreeMap<Platform, Arc<dyn Publisher>>,
}

impl PublisherFactoryBuilder {
    /// Register `publisher` for its platform, replacing any earlier one.
    pub fn register(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.insert(publisher.platform(), publisher);
        self
    }

    pub fn build(self) -> PublisherFactory {
        PublisherFactory {
            publishers: self.publishers,
        }
    }
}

impl PublisherFactory {
    pub fn builder() -> PublisherFactoryBuilder {
        PublisherFactoryBuilder::default()
    }

    /// Build one publisher per platform according to `[platforms.<name>]`.
    ///
    /// Platforms without a section, or with `mode = "noop"`, get a
    /// [`NoOpPublisher`].
    ///
    /// # Errors
    ///
    /// Returns an error if a live publisher's HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.publishing.timeout();
        let mut builder = Self::builder();

        for platform in Platform::ALL {
            let settings = config.platform(platform);
            let api_base = settings.api_base.as_deref();

            let publisher: Arc<dyn Publisher> = match settings.mode {
                PublisherMode::Noop => Arc::new(NoOpPublisher::new(platform)),
                PublisherMode::Live => match platform {
                    Platform::Facebook => Arc::new(FacebookPublisher::new(api_base, timeout)?),
                    Platform::Instagram => Arc::new(InstagramPublisher::new(api_base, timeout)?),
                    Platform::Twitter => Arc::new(TwitterPublisher::new(api_base, timeout)?),
                    Platform::LinkedIn => Arc::new(LinkedInPublisher::new(api_base, timeout)?),
                    Platform::YouTube => Arc::new(YouTubePublisher::new(api_base, timeout)?),
                    Platform::TikTok => Arc::new(TikTokPublisher::new(api_base, timeout)?),
                    Platform::Pinterest => Arc::new(PinterestPublisher::new(api_base, timeout)?),
                },
            };

            tracing::debug!(platform = %platform, mode = ?settings.mode, "Registered publisher");
            builder = builder.register(publisher);
        }

        Ok(builder.build())
    }

    /// Resolve the publisher for `platform`.
    ///
    /// # Errors
    ///
    /// Returns `BufferError::UnsupportedPlatform` when nothing is registered.
    pub fn create(&self, platform: Platform) -> Result<Arc<dyn Publisher>> {
        self.publishers
            .get(&platform)
            .cloned()
            .ok_or_else(|| BufferError::UnsupportedPlatform(platform.to_string()))
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.publishers.contains_key(&platform)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.publishers.keys().copied().collect()
    }
}
