//! Single-use, expiring tokens.
//!
//! Validation is read-only (safe to call repeatedly, e.g. to pre-flight a
//! reset form). Consumption runs the same checks and then asks the adapter to
//! flip the consumed flag conditionally: of several racing consumers exactly
//! one wins, the rest see [`TokenRejection::AlreadyConsumed`].

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use warden_core::{Clock, DomainError, DomainResult, UserId};

use crate::store::{AuthStore, store_err};
use crate::{Token, TokenRejection, TokenValue};

/// Outcome of a token check: the token on success, the reason otherwise.
pub type TokenOutcome = Result<Token, TokenRejection>;

pub struct TokenManager<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for TokenManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S> core::fmt::Debug for TokenManager<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenManager").finish_non_exhaustive()
    }
}

impl<S: AuthStore> TokenManager<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Issue a new token bound to `user_id` and `email`.
    pub async fn create_token(
        &self,
        user_id: UserId,
        email: &str,
        ttl: Duration,
    ) -> DomainResult<TokenValue> {
        if ttl <= Duration::zero() {
            return Err(DomainError::validation("token ttl must be positive"));
        }

        let token = Token::new(TokenValue::generate()?, user_id, email, self.clock.now(), ttl)?;
        let token = self
            .store
            .create_token(token)
            .await
            .map_err(store_err("create_token"))?;

        info!(
            %user_id,
            token = token.value.fingerprint(),
            expires = %token.expires,
            "token created"
        );
        Ok(token.value)
    }

    /// Check a token without consuming it.
    ///
    /// An expired token presented by its owner is deleted as a side effect, so
    /// later checks report `NotFound`.
    pub async fn validate_token(
        &self,
        value: &TokenValue,
        user_id: UserId,
    ) -> DomainResult<TokenOutcome> {
        let Some(token) = self
            .store
            .get_token(value)
            .await
            .map_err(store_err("get_token"))?
        else {
            debug!(token = value.fingerprint(), "token not found");
            return Ok(Err(TokenRejection::NotFound));
        };

        match token.check(user_id, self.clock.now()) {
            Ok(()) => Ok(Ok(token)),
            Err(TokenRejection::Expired) => {
                self.store
                    .delete_token(value)
                    .await
                    .map_err(store_err("delete_token"))?;
                warn!(token = value.fingerprint(), %user_id, "expired token removed");
                Ok(Err(TokenRejection::Expired))
            }
            Err(rejection) => {
                warn!(token = value.fingerprint(), %user_id, %rejection, "token rejected");
                Ok(Err(rejection))
            }
        }
    }

    /// Validate and, on success, consume a token.
    pub async fn consume_token(
        &self,
        value: &TokenValue,
        user_id: UserId,
    ) -> DomainResult<TokenOutcome> {
        let token = match self.validate_token(value, user_id).await? {
            Ok(token) => token,
            Err(rejection) => return Ok(Err(rejection)),
        };

        let now = self.clock.now();
        let won = self
            .store
            .mark_token_consumed(value, now)
            .await
            .map_err(store_err("mark_token_consumed"))?;
        if !won {
            warn!(token = value.fingerprint(), %user_id, "token consumed concurrently");
            return Ok(Err(TokenRejection::AlreadyConsumed));
        }

        info!(token = value.fingerprint(), %user_id, "token consumed");
        Ok(Ok(Token {
            consumed_at: Some(now),
            ..token
        }))
    }

    pub async fn get_all_tokens(&self) -> DomainResult<Vec<Token>> {
        self.store
            .get_all_tokens()
            .await
            .map_err(store_err("get_all_tokens"))
    }

    pub async fn delete_user_tokens(&self, user_id: UserId) -> DomainResult<u64> {
        self.store
            .delete_user_tokens(user_id)
            .await
            .map_err(store_err("delete_user_tokens"))
    }

    /// Purge all tokens with `expires <= now`; returns how many.
    pub async fn delete_expired_tokens(&self) -> DomainResult<u64> {
        let count = self
            .store
            .delete_expired_tokens(self.clock.now())
            .await
            .map_err(store_err("delete_expired_tokens"))?;
        info!(deleted = count, "expired tokens deleted");
        Ok(count)
    }
}
