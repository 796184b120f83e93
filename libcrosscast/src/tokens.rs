//! Token resolution
//!
//! Maps every requested destination to a stored credential before any
//! network call. Admission is all-or-nothing: one missing account fails
//! the whole request with the complete missing set, and nothing partial
//! leaks downstream. A process-wide TTL cache fronts the store, scoped
//! per (user, platform, account); refills are idempotent so racing
//! publishes are harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::db::Database;
use crate::error::{CrosscastError, MissingDestinations, Result};
use crate::types::{Platform, PublishRequest};

const CREDENTIAL_TTL: Duration = Duration::from_secs(300);

/// The minimal credential shape publishers need for one account.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAccount {
    pub account_id: String,
    pub display_name: String,
    pub credential: String,
}

/// Credentials for every requested destination, grouped by platform in
/// requested order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTokens {
    accounts: HashMap<Platform, Vec<ResolvedAccount>>,
}

impl ResolvedTokens {
    pub fn for_platform(&self, platform: Platform) -> &[ResolvedAccount] {
        self.accounts.get(&platform).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, platform: Platform, account_id: &str) -> Option<&ResolvedAccount> {
        self.for_platform(platform)
            .iter()
            .find(|a| a.account_id == account_id)
    }

    fn insert(&mut self, platform: Platform, account: ResolvedAccount) {
        self.accounts.entry(platform).or_default().push(account);
    }
}

pub struct TokenResolver {
    db: Arc<Database>,
    cache: Arc<TtlCache<ResolvedAccount>>,
}

impl TokenResolver {
    pub fn new(db: Arc<Database>, cache: Arc<TtlCache<ResolvedAccount>>) -> Self {
        Self { db, cache }
    }

    /// Resolve credentials for every destination in the request.
    ///
    /// Instagram feed and story destinations for the same account resolve
    /// through a single lookup. Any requested id without a connected
    /// account aborts with the full missing set.
    pub async fn resolve(&self, request: &PublishRequest) -> Result<ResolvedTokens> {
        let mut tokens = ResolvedTokens::default();
        let mut missing = MissingDestinations::default();

        for platform in Platform::ALL {
            let requested = request.account_ids_for(platform);
            if requested.is_empty() {
                continue;
            }

            let mut cached: HashMap<String, ResolvedAccount> = HashMap::new();
            let mut to_fetch: Vec<String> = Vec::new();
            for account_id in &requested {
                match self.cache.get(&cache_key(request.user_id, platform, account_id)) {
                    Some(account) => {
                        cached.insert(account_id.clone(), account);
                    }
                    None => to_fetch.push(account_id.clone()),
                }
            }

            let mut fetched: HashMap<String, ResolvedAccount> = HashMap::new();
            if !to_fetch.is_empty() {
                for row in self
                    .db
                    .get_accounts(request.user_id, platform, &to_fetch)
                    .await?
                {
                    let account = ResolvedAccount {
                        account_id: row.account_id.clone(),
                        display_name: row.display_name,
                        credential: row.credential,
                    };
                    self.cache.put(
                        cache_key(request.user_id, platform, &row.account_id),
                        account.clone(),
                        CREDENTIAL_TTL,
                    );
                    fetched.insert(row.account_id, account);
                }
            }

            let mut missing_ids = Vec::new();
            for account_id in requested {
                if let Some(account) = cached
                    .remove(&account_id)
                    .or_else(|| fetched.remove(&account_id))
                {
                    tokens.insert(platform, account);
                } else {
                    missing_ids.push(account_id);
                }
            }
            missing.push(platform, missing_ids);
        }

        if !missing.is_empty() {
            return Err(CrosscastError::MissingDestinations(missing));
        }

        Ok(tokens)
    }
}

fn cache_key(user_id: i64, platform: Platform, account_id: &str) -> String {
    format!("{}:{}:{}", user_id, platform.as_str(), account_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectedAccount, Destination};

    async fn resolver_with_accounts(
        accounts: Vec<(i64, Platform, &str)>,
    ) -> (TokenResolver, Arc<Database>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        for (user_id, platform, account_id) in accounts {
            db.upsert_account(&ConnectedAccount {
                id: None,
                user_id,
                platform,
                account_id: account_id.to_string(),
                display_name: format!("{} {}", platform, account_id),
                credential: format!("token-{}", account_id),
                created_at: chrono::Utc::now().timestamp(),
            })
            .await
            .unwrap();
        }
        (
            TokenResolver::new(Arc::clone(&db), Arc::new(TtlCache::new())),
            db,
        )
    }

    fn request(destinations: Vec<Destination>) -> PublishRequest {
        PublishRequest {
            user_id: 1,
            text: "hello".to_string(),
            media: vec![],
            destinations,
        }
    }

    #[tokio::test]
    async fn test_resolves_all_requested_accounts() {
        let (resolver, _db) = resolver_with_accounts(vec![
            (1, Platform::Facebook, "111"),
            (1, Platform::Telegram, "@chan"),
        ])
        .await;

        let tokens = resolver
            .resolve(&request(vec![
                Destination::facebook_page("111"),
                Destination::telegram_channel("@chan"),
            ]))
            .await
            .unwrap();

        assert_eq!(tokens.for_platform(Platform::Facebook).len(), 1);
        assert_eq!(
            tokens.get(Platform::Facebook, "111").unwrap().credential,
            "token-111"
        );
        assert_eq!(tokens.for_platform(Platform::Telegram).len(), 1);
        assert!(tokens.for_platform(Platform::X).is_empty());
    }

    #[tokio::test]
    async fn test_missing_account_fails_whole_request() {
        let (resolver, _db) =
            resolver_with_accounts(vec![(1, Platform::Facebook, "111")]).await;

        let err = resolver
            .resolve(&request(vec![
                Destination::facebook_page("111"),
                Destination::facebook_page("999"),
            ]))
            .await
            .unwrap_err();

        match err {
            CrosscastError::MissingDestinations(missing) => {
                assert_eq!(missing.missing.len(), 1);
                assert_eq!(missing.missing[0].platform, Platform::Facebook);
                assert_eq!(missing.missing[0].account_ids, vec!["999".to_string()]);
            }
            other => panic!("expected missing destinations, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_set_spans_platforms() {
        let (resolver, _db) = resolver_with_accounts(vec![(1, Platform::X, "good")]).await;

        let err = resolver
            .resolve(&request(vec![
                Destination::x_account("good"),
                Destination::x_account("gone"),
                Destination::telegram_channel("@absent"),
            ]))
            .await
            .unwrap_err();

        match err {
            CrosscastError::MissingDestinations(missing) => {
                assert_eq!(missing.missing.len(), 2);
                let platforms: Vec<Platform> =
                    missing.missing.iter().map(|m| m.platform).collect();
                assert!(platforms.contains(&Platform::X));
                assert!(platforms.contains(&Platform::Telegram));
            }
            other => panic!("expected missing destinations, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_instagram_post_and_story_share_one_credential() {
        let (resolver, _db) =
            resolver_with_accounts(vec![(1, Platform::Instagram, "ig1")]).await;

        let tokens = resolver
            .resolve(&request(vec![
                Destination::instagram_post("ig1"),
                Destination::instagram_story("ig1"),
            ]))
            .await
            .unwrap();

        // One credential entry despite two destinations.
        assert_eq!(tokens.for_platform(Platform::Instagram).len(), 1);
    }

    #[tokio::test]
    async fn test_accounts_scoped_by_user() {
        let (resolver, _db) = resolver_with_accounts(vec![(2, Platform::X, "acct")]).await;

        let err = resolver
            .resolve(&request(vec![Destination::x_account("acct")]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_resolution() {
        let (resolver, db) = resolver_with_accounts(vec![(1, Platform::X, "acct")]).await;

        let req = request(vec![Destination::x_account("acct")]);
        let first = resolver.resolve(&req).await.unwrap();
        assert_eq!(
            first.get(Platform::X, "acct").unwrap().credential,
            "token-acct"
        );

        // Change the stored credential; within the TTL the cache still
        // answers with the first value.
        db.upsert_account(&ConnectedAccount {
            id: None,
            user_id: 1,
            platform: Platform::X,
            account_id: "acct".to_string(),
            display_name: "x acct".to_string(),
            credential: "rotated".to_string(),
            created_at: chrono::Utc::now().timestamp(),
        })
        .await
        .unwrap();

        let second = resolver.resolve(&req).await.unwrap();
        assert_eq!(
            second.get(Platform::X, "acct").unwrap().credential,
            "token-acct"
        );
    }

    #[tokio::test]
    async fn test_requested_order_preserved() {
        let (resolver, _db) = resolver_with_accounts(vec![
            (1, Platform::Facebook, "b"),
            (1, Platform::Facebook, "a"),
            (1, Platform::Facebook, "c"),
        ])
        .await;

        let tokens = resolver
            .resolve(&request(vec![
                Destination::facebook_page("c"),
                Destination::facebook_page("a"),
                Destination::facebook_page("b"),
            ]))
            .await
            .unwrap();

        let ids: Vec<&str> = tokens
            .for_platform(Platform::Facebook)
            .iter()
            .map(|a| a.account_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
