//! Identity verification and registration.
//!
//! The provider itself is a collaborator behind [`IdentityProvider`]; this
//! module adds the bounded clock-skew retry, role resolution from the stored
//! profile and the registration flow.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{IdentityAccount, IdentityConfig};
use crate::error::{IdentityError, ServiceError};
use crate::models::{AuthenticatedUser, Role, UserAccount, USERS};
use crate::stats;
use crate::store::{self, DocumentStore};

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: String,
}

/// Credential minted for a newly created account.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedCredential {
    pub uid: String,
    pub token: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity, IdentityError>;

    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<IssuedCredential, IdentityError>;
}

/// Provider backed by a fixed table of credentials, for local use and tests.
pub struct StaticIdentityProvider {
    accounts: RwLock<HashMap<String, IdentityAccount>>,
    leeway: chrono::Duration,
}

impl StaticIdentityProvider {
    pub fn new(accounts: Vec<IdentityAccount>, leeway_secs: i64) -> Self {
        Self {
            accounts: RwLock::new(
                accounts
                    .into_iter()
                    .map(|account| (account.token.clone(), account))
                    .collect(),
            ),
            leeway: chrono::Duration::seconds(leeway_secs),
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(config.accounts.clone(), config.leeway_secs)
    }

    fn check(&self, account: &IdentityAccount, now: DateTime<Utc>) -> Result<(), IdentityError> {
        if let Some(not_before) = account.not_before {
            if now + self.leeway < not_before {
                return Err(IdentityError::ClockSkew(format!(
                    "token valid from {not_before}, now {now}"
                )));
            }
        }
        if let Some(expires_at) = account.expires_at {
            if now - self.leeway >= expires_at {
                return Err(IdentityError::Expired);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity, IdentityError> {
        let accounts = self.accounts.read();
        let account = accounts
            .get(credential)
            .ok_or(IdentityError::InvalidCredential)?;
        self.check(account, Utc::now())?;

        Ok(VerifiedIdentity {
            uid: account.uid.clone(),
            display_name: account.display_name.clone(),
            email: account.email.clone(),
        })
    }

    async fn create_account(
        &self,
        email: &str,
        _password: &str,
        display_name: &str,
    ) -> Result<IssuedCredential, IdentityError> {
        let mut accounts = self.accounts.write();
        if accounts.values().any(|a| a.email.eq_ignore_ascii_case(email)) {
            return Err(IdentityError::AccountExists(email.to_string()));
        }

        let uid = Uuid::new_v4().simple().to_string();
        let token = Uuid::new_v4().to_string();
        accounts.insert(
            token.clone(),
            IdentityAccount {
                token: token.clone(),
                uid: uid.clone(),
                display_name: Some(display_name.to_string()),
                email: email.to_string(),
                not_before: None,
                expires_at: None,
            },
        );
        Ok(IssuedCredential { uid, token })
    }
}

/// Verify a credential, retrying a bounded number of times while the
/// provider reports a transient failure.
pub async fn verify_with_retry(
    provider: &dyn IdentityProvider,
    credential: &str,
    retries: u32,
    backoff: Duration,
) -> Result<VerifiedIdentity, ServiceError> {
    let mut attempt = 0;
    loop {
        match provider.verify(credential).await {
            Ok(identity) => return Ok(identity),
            Err(err) if err.is_transient() && attempt < retries => {
                attempt += 1;
                warn!(attempt, error = %err, "transient identity failure, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(ServiceError::Unauthorized(err.to_string())),
        }
    }
}

pub struct Authenticator<'a> {
    pub provider: &'a dyn IdentityProvider,
    pub store: &'a dyn DocumentStore,
    pub retries: u32,
    pub backoff: Duration,
}

impl<'a> Authenticator<'a> {
    pub fn new(
        provider: &'a dyn IdentityProvider,
        store: &'a dyn DocumentStore,
        config: &IdentityConfig,
    ) -> Self {
        Self {
            provider,
            store,
            retries: config.clock_skew_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub async fn authenticate(
        &self,
        credential: Option<&str>,
    ) -> Result<AuthenticatedUser, ServiceError> {
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized("missing credential".to_string()))?;

        let identity =
            verify_with_retry(self.provider, credential, self.retries, self.backoff).await?;

        let profile: Option<UserAccount> = store::get_as(self.store, USERS, &identity.uid)
            .await
            .map_err(ServiceError::persistence("failed to load profile"))?;

        Ok(AuthenticatedUser {
            id: identity.uid,
            name: identity
                .display_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            email: identity.email,
            role: profile.map(|p| p.role).unwrap_or_default(),
        })
    }
}

pub struct Registration<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub name: &'a str,
    pub role: Role,
}

/// A stored profile together with the credential that signs in as it.
#[derive(Debug)]
pub struct RegisteredUser {
    pub account: UserAccount,
    pub credential: IssuedCredential,
}

impl RegisteredUser {
    /// Entry for `[[identity.accounts]]` so later runs can verify the credential.
    pub fn config_entry(&self) -> IdentityAccount {
        IdentityAccount {
            token: self.credential.token.clone(),
            uid: self.account.id.clone(),
            display_name: Some(self.account.name.clone()),
            email: self.account.email.clone(),
            not_before: None,
            expires_at: None,
        }
    }
}

pub async fn register(
    provider: &dyn IdentityProvider,
    store: &dyn DocumentStore,
    registration: &Registration<'_>,
    registered_at: DateTime<Utc>,
    write_attempts: u32,
) -> Result<RegisteredUser, ServiceError> {
    let email = registration.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ServiceError::ValidationFailed(format!("invalid email '{email}'")));
    }
    if registration.name.trim().is_empty() {
        return Err(ServiceError::ValidationFailed("name must not be empty".to_string()));
    }
    if registration.password.is_empty() {
        return Err(ServiceError::ValidationFailed("password must not be empty".to_string()));
    }

    let credential = provider
        .create_account(email, registration.password, registration.name.trim())
        .await
        .map_err(|err| match err {
            IdentityError::AccountExists(_) => ServiceError::ValidationFailed(err.to_string()),
            other => ServiceError::Unauthorized(other.to_string()),
        })?;

    let account = UserAccount {
        id: credential.uid.clone(),
        name: registration.name.trim().to_string(),
        email: email.to_string(),
        role: registration.role,
        total_series_generated: 0,
        avg_error: 0.0,
        last_activity: registered_at,
    };

    let body = serde_json::to_value(&account)
        .map_err(|err| ServiceError::persistence("failed to create user")(err.into()))?;
    store
        .set(USERS, &account.id, body)
        .await
        .map_err(ServiceError::persistence("failed to create user"))?;

    stats::register_in_dashboard(store, &account, write_attempts)
        .await
        .map_err(ServiceError::persistence("failed to create user"))?;

    info!(uid = %account.id, role = %account.role, "user registered");
    Ok(RegisteredUser {
        account,
        credential,
    })
}
