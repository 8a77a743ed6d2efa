//! Social account management
//!
//! Tokens are issued elsewhere; this service stores the connection, keeps
//! it up to date and answers ownership questions.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::validation::AccountValidator;
use crate::commands::{CreateSocialAccount, ListSocialAccounts, UpdateSocialAccount, Validate};
use crate::db::Repository;
use crate::error::{BufferError, Result};
use crate::types::SocialAccount;

#[derive(Clone)]
pub struct AccountService {
    repo: Arc<dyn Repository>,
    validator: AccountValidator,
}

impl AccountService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        let validator = AccountValidator::new(Arc::clone(&repo));
        Self { repo, validator }
    }

    /// Store a newly connected account
    ///
    /// # Errors
    ///
    /// Returns `BufferError::Validation` for malformed input, an expired
    /// token, or an account the user already connected.
    pub async fn connect(&self, command: CreateSocialAccount) -> Result<SocialAccount> {
        let now = Utc::now();
        self.validator.validate_create(&command, now).await?;

        let mut account = SocialAccount {
            id: 0,
            user_id: command.user_id,
            platform: command.platform()?,
            external_id: command.external_id.trim().to_string(),
            display_name: command.display_name,
            access_token: command.access_token,
            connected: true,
            token_expires_at: command.token_expires_at,
            created_at: now,
        };
        account.id = self.repo.create_account(&account).await?;

        info!(
            account_id = account.id,
            user_id = account.user_id,
            platform = %account.platform,
            "Social account connected"
        );
        Ok(account)
    }

    /// Apply token refreshes, renames and connection changes.
    pub async fn update(&self, command: UpdateSocialAccount) -> Result<SocialAccount> {
        self.validator.validate_update(&command, Utc::now()).await?;
        let mut account = self.get(command.account_id, command.user_id).await?;

        if let Some(display_name) = command.display_name {
            account.display_name = Some(display_name);
        }
        if let Some(token) = command.access_token {
            account.access_token = token;
        }
        if let Some(expires_at) = command.token_expires_at {
            account.token_expires_at = Some(expires_at);
        }
        if let Some(connected) = command.connected {
            account.connected = connected;
        }

        self.repo.update_account(&account).await?;
        info!(account_id = account.id, connected = account.connected, "Social account updated");
        Ok(account)
    }

    /// Keep the account but stop publishing to it.
    pub async fn disconnect(&self, account_id: i64, user_id: i64) -> Result<SocialAccount> {
        let mut account = self.get(account_id, user_id).await?;
        account.connected = false;
        self.repo.update_account(&account).await?;
        info!(account_id, "Social account disconnected");
        Ok(account)
    }

    pub async fn delete(&self, account_id: i64, user_id: i64) -> Result<()> {
        self.get(account_id, user_id).await?;
        self.repo.delete_account(account_id).await?;
        info!(account_id, "Social account deleted");
        Ok(())
    }

    /// An account owned by `user_id`; someone else's account is `NotFound`.
    pub async fn get(&self, account_id: i64, user_id: i64) -> Result<SocialAccount> {
        match self.repo.find_account(account_id).await? {
            Some(account) if account.user_id == user_id => Ok(account),
            _ => Err(BufferError::NotFound(format!("social account {}", account_id))),
        }
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<SocialAccount>> {
        self.repo.list_accounts(user_id).await
    }

    /// A user's accounts narrowed by platform, connection or usability.
    pub async fn list_matching(&self, query: ListSocialAccounts) -> Result<Vec<SocialAccount>> {
        query.validate()?;
        let filter = query.to_filter()?;
        let now = Utc::now();
        let mut accounts = self.repo.list_accounts(query.user_id).await?;
        accounts.retain(|account| filter.matches(account, now));
        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::types::Platform;
    use chrono::Duration;

    fn command() -> CreateSocialAccount {
        CreateSocialAccount {
            user_id: 5,
            platform: "LinkedIn".to_string(),
            external_id: " urn:li:person:abc ".to_string(),
            access_token: "secret".to_string(),
            display_name: Some("Ada".to_string()),
            token_expires_at: Some(Utc::now() + Duration::days(30)),
        }
    }

    #[tokio::test]
    async fn test_connect_update_disconnect() {
        let service = AccountService::new(Arc::new(MemoryRepository::new()));

        let account = service.connect(command()).await.unwrap();
        assert!(account.id > 0);
        assert_eq!(account.external_id, "urn:li:person:abc");
        assert!(account.connected);

        // Same external id again is a duplicate
        assert!(matches!(
            service.connect(command()).await,
            Err(BufferError::Validation(_))
        ));

        let updated = service
            .update(UpdateSocialAccount {
                account_id: account.id,
                user_id: 5,
                access_token: Some("rotated".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.access_token, "rotated");

        let disconnected = service.disconnect(account.id, 5).await.unwrap();
        assert!(!disconnected.is_usable(Utc::now()));
    }

    #[tokio::test]
    async fn test_accounts_are_owner_scoped() {
        let service = AccountService::new(Arc::new(MemoryRepository::new()));
        let account = service.connect(command()).await.unwrap();

        assert!(matches!(
            service.get(account.id, 6).await,
            Err(BufferError::NotFound(_))
        ));
        assert!(service.delete(account.id, 6).await.is_err());
        assert_eq!(service.list(5).await.unwrap().len(), 1);

        service.delete(account.id, 5).await.unwrap();
        assert!(service.list(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_by_platform_and_connection() {
        let repo = Arc::new(MemoryRepository::new());
        let service = AccountService::new(repo.clone());
        let linkedin = service.connect(command()).await.unwrap();
        let twitter = service
            .connect(CreateSocialAccount {
                platform: "twitter".to_string(),
                external_id: "tw-5".to_string(),
                ..command()
            })
            .await
            .unwrap();
        // Connected, but the token lapsed since
        let expired_id = repo
            .create_account(&SocialAccount {
                id: 0,
                user_id: 5,
                platform: Platform::Twitter,
                external_id: "tw-old".to_string(),
                display_name: None,
                access_token: "stale".to_string(),
                connected: true,
                token_expires_at: Some(Utc::now() - Duration::days(1)),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        service.disconnect(linkedin.id, 5).await.unwrap();

        let on_twitter = service
            .list_matching(ListSocialAccounts {
                platform: Some("x".to_string()),
                ..ListSocialAccounts::for_user(5)
            })
            .await
            .unwrap();
        assert_eq!(on_twitter.len(), 2);

        let connected = service
            .list_matching(ListSocialAccounts {
                connected_only: true,
                ..ListSocialAccounts::for_user(5)
            })
            .await
            .unwrap();
        let ids: Vec<i64> = connected.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![twitter.id, expired_id]);

        let usable = service
            .list_matching(ListSocialAccounts {
                usable_only: true,
                ..ListSocialAccounts::for_user(5)
            })
            .await
            .unwrap();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].id, twitter.id);

        assert!(matches!(
            service
                .list_matching(ListSocialAccounts {
                    platform: Some("myspace".to_string()),
                    ..ListSocialAccounts::for_user(5)
                })
                .await,
            Err(BufferError::Validation(_))
        ));
    }
}
