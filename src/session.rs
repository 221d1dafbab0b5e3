// Per-session client state: query cache, optimistic interactions and search
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::gateway::{Gateway, GatewayError, GatewayResult};
use crate::interaction::Interactions;
use crate::model::User;
use crate::query::Queries;
use crate::search::SearchController;

/// What one signed-in client holds between requests
pub struct ClientSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub queries: Arc<Queries>,
    pub interactions: Interactions,
    pub search: Arc<SearchController>,
    /// Raw search box input, debounced before it reaches `search`
    search_input: watch::Sender<String>,
}

impl ClientSession {
    pub async fn open(
        gateway: Gateway,
        token: &str,
        stale_time: Duration,
        debounce_delay: Duration,
    ) -> GatewayResult<Self> {
        let live = gateway.verify_session(token).await?;
        let queries = Arc::new(Queries::new(gateway, stale_time));
        let user = queries.get_current_user(token).await?;
        let interactions = Interactions::new(queries.clone(), user.id.clone());
        let search = Arc::new(SearchController::new(queries.clone()));

        // Ends once the sender is dropped with the session
        let (search_input, input) = watch::channel(String::new());
        search.clone().attach(input, debounce_delay);

        Ok(Self {
            token: token.to_string(),
            expires_at: live.expires_at,
            queries,
            interactions,
            search,
            search_input,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub async fn current_user(&self) -> GatewayResult<User> {
        self.queries.get_current_user(&self.token).await
    }

    /// Record the search box contents; a search runs once typing settles
    pub fn type_search(&self, term: &str) {
        self.search_input.send_replace(term.to_string());
    }
}

pub struct SessionRegistry {
    gateway: Gateway,
    stale_time: Duration,
    debounce_delay: Duration,
    sessions: Mutex<HashMap<String, Arc<ClientSession>>>,
}

impl SessionRegistry {
    pub fn new(gateway: Gateway, stale_time: Duration, debounce_delay: Duration) -> Self {
        Self {
            gateway,
            stale_time,
            debounce_delay,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, token: &str) -> Option<Arc<ClientSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .cloned()
    }

    /// The client state for `token`, opened on first use.
    ///
    /// Every call re-checks the token with the backend. A session the backend
    /// no longer accepts is evicted and the lookup fails with `Unauthorized`.
    pub async fn get_or_open(&self, token: &str) -> GatewayResult<Arc<ClientSession>> {
        if let Some(session) = self.cached(token) {
            return match self.gateway.verify_session(token).await {
                Ok(_) => Ok(session),
                Err(GatewayError::Unauthorized) => {
                    self.remove(token);
                    tracing::debug!("Evicted session that is no longer valid");
                    Err(GatewayError::Unauthorized)
                }
                Err(e) => Err(e),
            };
        }

        let opened = Arc::new(
            ClientSession::open(
                self.gateway.clone(),
                token,
                self.stale_time,
                self.debounce_delay,
            )
            .await?,
        );
        self.prune_expired(Utc::now());
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions
            .entry(token.to_string())
            .or_insert(opened)
            .clone())
    }

    /// Drop every session whose expiry has passed; returns how many went
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        let pruned = before - sessions.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired sessions");
        }
        pruned
    }

    pub fn remove(&self, token: &str) -> Option<Arc<ClientSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendClient, DiskFileStorage, SqliteBackend};
    use crate::config::FeedConfig;
    use crate::db;
    use crate::model::NewUser;

    async fn signed_in(tmp: &tempfile::TempDir) -> (Gateway, String) {
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        let backend = BackendClient::self_hosted(
            SqliteBackend::new(pool.clone(), 24).with_hash_cost(4),
            DiskFileStorage::new(pool, tmp.path().join("uploads"), "/storage"),
        );
        let gateway = Gateway::new(backend, FeedConfig::default());
        gateway
            .create_user_account(NewUser {
                name: "Ada Lovelace".into(),
                username: "ada".into(),
                email: "ada@example.com".into(),
                password: "password123".into(),
            })
            .await
            .unwrap();
        let session = gateway
            .sign_in_account("ada@example.com", "password123")
            .await
            .unwrap();
        (gateway, session.token)
    }

    fn registry(gateway: Gateway) -> SessionRegistry {
        SessionRegistry::new(gateway, Duration::from_secs(60), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn reuses_open_session_while_valid() {
        let tmp = tempfile::tempdir().unwrap();
        let (gateway, token) = signed_in(&tmp).await;
        let sessions = registry(gateway);

        let first = sessions.get_or_open(&token).await.unwrap();
        let second = sessions.get_or_open(&token).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.expires_at > Utc::now());
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn revoked_token_is_evicted() {
        let tmp = tempfile::tempdir().unwrap();
        let (gateway, token) = signed_in(&tmp).await;
        let sessions = registry(gateway.clone());
        sessions.get_or_open(&token).await.unwrap();

        gateway.sign_out_account(&token).await.unwrap();

        assert!(matches!(
            sessions.get_or_open(&token).await,
            Err(GatewayError::Unauthorized)
        ));
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn prune_drops_only_expired_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        let (gateway, token) = signed_in(&tmp).await;
        let sessions = registry(gateway);
        sessions.get_or_open(&token).await.unwrap();

        assert_eq!(sessions.prune_expired(Utc::now()), 0);
        assert_eq!(sessions.len(), 1);

        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(sessions.prune_expired(later), 1);
        assert!(sessions.is_empty());
    }
}
