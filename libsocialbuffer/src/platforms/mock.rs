//! Scripted publisher for tests
//!
//! Outcomes are scripted per account: an account can fail every time, fail
//! a fixed number of times and then recover, or succeed. A delay simulates
//! network latency. Every call is counted so tests can assert exactly what
//! reached the "platform".

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::{PlatformError, Result};
use crate::platforms::{PublishedPost, Publisher};
use crate::types::{Platform, Post, SocialAccount};

#[derive(Debug, Clone)]
enum Script {
    Always(PlatformError),
    Times(PlatformError, usize),
}

/// One call that reached the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub post_id: Uuid,
    pub account_id: i64,
    pub content: String,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<i64, Script>,
    calls: Vec<MockCall>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Mock publisher for one platform
#[derive(Debug, Clone)]
pub struct MockPublisher {
    platform: Platform,
    delay: Duration,
    enforce_rules: bool,
    state: Arc<Mutex<MockState>>,
}

impl MockPublisher {
    /// A publisher that accepts everything immediately.
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            delay: Duration::ZERO,
            enforce_rules: false,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Wait `delay` inside every publish call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reject posts that break the platform rules, like a live publisher.
    pub fn enforcing_rules(mut self) -> Self {
        self.enforce_rules = true;
        self
    }

    /// Every publish to `account_id` fails with `error`.
    pub fn fail_account(self, account_id: i64, error: PlatformError) -> Self {
        self.lock().scripts.insert(account_id, Script::Always(error));
        self
    }

    /// The next `times` publishes to `account_id` fail, later ones succeed.
    pub fn fail_account_times(self, account_id: i64, error: PlatformError, times: usize) -> Self {
        self.lock()
            .scripts
            .insert(account_id, Script::Times(error, times));
        self
    }

    /// Number of publish calls received so far
    pub fn publish_call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Calls received for `account_id`
    pub fn calls_for(&self, account_id: i64) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.account_id == account_id)
            .count()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Highest number of publish calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn scripted_error(&self, account_id: i64) -> Option<PlatformError> {
        let mut state = self.lock();
        match state.scripts.get_mut(&account_id) {
            Some(Script::Always(error)) => Some(error.clone()),
            Some(Script::Times(error, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(error.clone())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(&self, post: &Post, account: &SocialAccount) -> Result<PublishedPost> {
        {
            let mut state = self.lock();
            state.calls.push(MockCall {
                post_id: post.id(),
                account_id: account.id,
                content: post.content().to_string(),
            });
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let outcome = if self.enforce_rules {
            self.validate(post)
        } else {
            Ok(())
        }
        .and_then(|()| match self.scripted_error(account.id) {
            Some(error) => Err(error.into()),
            None => Ok(PublishedPost::new(format!(
                "mock:{}:{}:{}",
                self.platform,
                account.id,
                Uuid::new_v4()
            ))),
        });

        self.lock().in_flight -= 1;
        outcome
    }
}
