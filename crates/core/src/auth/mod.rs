//! Authentication and authorisation.
//!
//! ## Sessions
//!
//! A login creates a `sessions/<id>` document and hands the client the token
//! `<id>.<secret>`. Only the SHA-256 of the secret is stored, so a leaked store does not
//! leak usable tokens. Tokens are checked in constant time and expire after the configured
//! TTL; expired sessions are deleted when presented and by [`AuthService::purge_expired`].
//!
//! ## Permissions
//!
//! Permissions come from the union of the user's roles and are resolved on every request,
//! so role edits take effect immediately.

pub mod password;
mod permissions;

pub use permissions::Permission;

use crate::constants::{ADMIN_ROLE_NAME, SESSIONS};
use crate::repositories::roles::{Role, RoleService};
use crate::repositories::users::{User, UserService};
use crate::store::{Collection, DocumentStore, Entity, FilterOp, Query, Stored};
use crate::{CoreConfig, HmsError, HmsResult};
use chrono::{DateTime, Utc};
use hms_types::NonEmptyText;
use hms_uuid::DocumentId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use subtle::ConstantTimeEq;

const SECRET_LENGTH: usize = 32;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub user_id: DocumentId,
    pub secret_hash: String,
    pub expires_at: DateTime<Utc>,
    /// Mirror of `expires_at` so the store can filter numerically.
    pub expires_at_unix: i64,
}

impl Entity for Session {
    const COLLECTION: &'static str = SESSIONS;
    const NAME: &'static str = "session";
}

/// The authenticated caller of one request.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub session_id: DocumentId,
    pub user: Stored<User>,
    pub permissions: BTreeSet<Permission>,
}

impl AuthContext {
    pub fn user_id(&self) -> DocumentId {
        self.user.id
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> HmsResult<()> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(HmsError::Forbidden(permission.to_string()))
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: Stored<User>,
    pub permissions: BTreeSet<Permission>,
}

#[derive(Clone, Debug)]
pub struct AuthService {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn DocumentStore>,
    sessions: Collection<Session>,
}

fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Splits `<id>.<secret>`; anything else is not a token.
fn parse_token(token: &str) -> Option<(DocumentId, &str)> {
    let (id, secret) = token.split_once('.')?;
    let id = DocumentId::parse(id).ok()?;
    if secret.is_empty() {
        return None;
    }
    Some((id, secret))
}

impl AuthService {
    pub fn new(cfg: Arc<CoreConfig>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            cfg,
            sessions: Collection::new(store.clone()),
            store,
        }
    }

    fn users(&self) -> UserService {
        UserService::new(self.cfg.clone(), self.store.clone())
    }

    fn roles(&self) -> RoleService {
        RoleService::new(self.store.clone())
    }

    pub async fn login(&self, email: &str, password: &str) -> HmsResult<LoginOutcome> {
        let user = match self.users().verify_credentials(email, password).await {
            Ok(user) => user,
            Err(e) => {
                tracing::info!("failed login attempt");
                return Err(e);
            }
        };

        let mut secret_bytes = [0u8; SECRET_LENGTH];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let secret = hex::encode(secret_bytes);

        let expires_at = Utc::now() + self.cfg.session_ttl();
        let session = self
            .sessions
            .create(Session {
                user_id: user.id,
                secret_hash: hash_secret(&secret),
                expires_at,
                expires_at_unix: expires_at.timestamp(),
            })
            .await?;

        let permissions = self.roles().permissions_for(&user.data.role_ids).await?;
        tracing::info!("user {} logged in", user.id);

        Ok(LoginOutcome {
            token: format!("{}.{}", session.id, secret),
            expires_at,
            user,
            permissions,
        })
    }

    /// Resolves a session token to the caller. Any failure is `Unauthorized`.
    pub async fn authenticate(&self, token: &str) -> HmsResult<AuthContext> {
        let (session_id, secret) = parse_token(token).ok_or(HmsError::Unauthorized)?;
        let session = self
            .sessions
            .get(&session_id)
            .await?
            .ok_or(HmsError::Unauthorized)?;

        let presented = hash_secret(secret);
        let matches: bool = presented
            .as_bytes()
            .ct_eq(session.data.secret_hash.as_bytes())
            .into();
        if !matches {
            return Err(HmsError::Unauthorized);
        }

        if session.data.expires_at <= Utc::now() {
            self.sessions.delete(&session_id).await?;
            return Err(HmsError::Unauthorized);
        }

        let user = match self.users().get(&session.data.user_id).await {
            Ok(user) if user.data.active => user,
            Ok(_) | Err(HmsError::NotFound { .. }) => {
                self.sessions.delete(&session_id).await?;
                return Err(HmsError::Unauthorized);
            }
            Err(e) => return Err(e),
        };

        let permissions = self.roles().permissions_for(&user.data.role_ids).await?;
        Ok(AuthContext {
            session_id,
            user,
            permissions,
        })
    }

    /// Ends a session. Unknown or malformed tokens are ignored.
    pub async fn logout(&self, token: &str) -> HmsResult<bool> {
        match parse_token(token) {
            Some((session_id, _)) => {
                let removed = self.sessions.delete(&session_id).await?;
                if removed {
                    tracing::info!("session {} ended", session_id);
                }
                Ok(removed)
            }
            None => Ok(false),
        }
    }

    /// Deletes every expired session and returns how many were removed.
    pub async fn purge_expired(&self) -> HmsResult<usize> {
        let now = Utc::now().timestamp();
        let expired = self
            .sessions
            .all(Query::new().filter("expires_at_unix", FilterOp::Lt, now + 1))
            .await?;

        let mut removed = 0;
        for session in expired {
            if self.sessions.delete(&session.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("purged {} expired sessions", removed);
        }
        Ok(removed)
    }

    /// Creates the administrator role and account when the store has no users yet and
    /// bootstrap credentials are configured. Returns the new admin, if one was created.
    pub async fn bootstrap_admin(&self) -> HmsResult<Option<Stored<User>>> {
        let Some(admin) = self.cfg.bootstrap_admin() else {
            return Ok(None);
        };

        let users = self.users();
        if users.any_exist().await? {
            tracing::debug!("users already exist; skipping admin bootstrap");
            return Ok(None);
        }

        let role_id = DocumentId::derived("role", ADMIN_ROLE_NAME);
        let role = Role {
            name: NonEmptyText::new(ADMIN_ROLE_NAME)?,
            description: Some("Full access to every area".into()),
            permissions: Permission::ALL.into_iter().collect(),
        };
        match self.roles().create_with_id(role_id, role).await {
            Ok(_) | Err(HmsError::AlreadyExists { .. }) => {}
            Err(e) => return Err(e),
        }

        let user = User {
            email: admin.email.clone(),
            full_name: NonEmptyText::new(ADMIN_ROLE_NAME)?,
            role_ids: vec![role_id],
            active: true,
            phone: None,
            department: None,
        };
        let created = users.create_user(user, admin.password.clone()).await?;
        tracing::info!("bootstrapped administrator {}", created.data.email);
        Ok(Some(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BootstrapAdmin, StoreBackend};
    use crate::repositories::users::NewUser;
    use crate::store::MemoryStore;
    use crate::Hms;
    use hms_types::EmailAddress;
    use tempfile::TempDir;

    fn hms_with(cfg: CoreConfig) -> Hms {
        Hms::new(Arc::new(cfg), Arc::new(MemoryStore::new()))
    }

    fn base_cfg(temp: &TempDir) -> CoreConfig {
        CoreConfig::new(StoreBackend::Memory, temp.path().to_path_buf())
            .with_password_iterations(1_000)
            .unwrap()
    }

    async fn user(hms: &Hms, email: &str) -> Stored<User> {
        hms.users()
            .create(NewUser {
                email: email.into(),
                full_name: "Test User".into(),
                password: "password123".into(),
                role_ids: vec![],
                phone: None,
                department: None,
                active: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn login_authenticate_logout() {
        let temp = TempDir::new().unwrap();
        let hms = hms_with(base_cfg(&temp));
        let created = user(&hms, "nurse@example.org").await;
        let auth = hms.auth();

        let outcome = auth.login("nurse@example.org", "password123").await.unwrap();
        assert_eq!(outcome.user.id, created.id);

        let ctx = auth.authenticate(&outcome.token).await.unwrap();
        assert_eq!(ctx.user_id(), created.id);
        assert!(ctx.require(Permission::PatientsRead).is_err());

        assert!(auth.logout(&outcome.token).await.unwrap());
        assert!(matches!(
            auth.authenticate(&outcome.token).await.unwrap_err(),
            HmsError::Unauthorized
        ));
    }

    #[tokio::test]
    async fn tampered_and_malformed_tokens_are_rejected() {
        let temp = TempDir::new().unwrap();
        let hms = hms_with(base_cfg(&temp));
        user(&hms, "a@example.org").await;
        let auth = hms.auth();
        let outcome = auth.login("a@example.org", "password123").await.unwrap();

        let (id, _) = outcome.token.split_once('.').unwrap();
        for token in [
            format!("{id}.deadbeef"),
            "garbage".to_string(),
            format!("{}.", id),
            format!("{}.{}", DocumentId::new(), "00"),
        ] {
            assert!(matches!(
                auth.authenticate(&token).await.unwrap_err(),
                HmsError::Unauthorized
            ));
        }
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected_and_purged() {
        let temp = TempDir::new().unwrap();
        let hms = hms_with(base_cfg(&temp));
        let created = user(&hms, "a@example.org").await;
        let auth = hms.auth();

        let sessions: Collection<Session> = Collection::new(hms.store().clone());
        let past = Utc::now() - chrono::Duration::hours(1);
        let secret = "abc123";
        let expired = sessions
            .create(Session {
                user_id: created.id,
                secret_hash: hash_secret(secret),
                expires_at: past,
                expires_at_unix: past.timestamp(),
            })
            .await
            .unwrap();
        let stale = sessions
            .create(Session {
                user_id: created.id,
                secret_hash: hash_secret(secret),
                expires_at: past,
                expires_at_unix: past.timestamp(),
            })
            .await
            .unwrap();
        let live = auth.login("a@example.org", "password123").await.unwrap();

        let err = auth
            .authenticate(&format!("{}.{}", expired.id, secret))
            .await
            .unwrap_err();
        assert!(matches!(err, HmsError::Unauthorized));
        assert!(sessions.get(&expired.id).await.unwrap().is_none());

        assert_eq!(auth.purge_expired().await.unwrap(), 1);
        assert!(sessions.get(&stale.id).await.unwrap().is_none());
        auth.authenticate(&live.token).await.unwrap();
    }

    #[tokio::test]
    async fn deactivated_user_loses_session() {
        let temp = TempDir::new().unwrap();
        let hms = hms_with(base_cfg(&temp));
        let created = user(&hms, "a@example.org").await;
        let auth = hms.auth();
        let outcome = auth.login("a@example.org", "password123").await.unwrap();

        hms.users()
            .update(
                &created.id,
                crate::repositories::users::UserUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(auth.authenticate(&outcome.token).await.is_err());
    }

    #[tokio::test]
    async fn bootstrap_creates_admin_once() {
        let temp = TempDir::new().unwrap();
        let cfg = base_cfg(&temp)
            .with_bootstrap_admin(BootstrapAdmin {
                email: EmailAddress::parse("root@example.org").unwrap(),
                password: "bootstrap-pass".into(),
            })
            .unwrap();
        let hms = hms_with(cfg);
        let auth = hms.auth();

        let admin = auth.bootstrap_admin().await.unwrap().expect("admin created");
        assert!(auth.bootstrap_admin().await.unwrap().is_none());

        let outcome = auth.login("root@example.org", "bootstrap-pass").await.unwrap();
        assert_eq!(outcome.user.id, admin.id);
        assert_eq!(outcome.permissions.len(), Permission::ALL.len());
    }

    #[tokio::test]
    async fn bootstrap_without_credentials_does_nothing() {
        let temp = TempDir::new().unwrap();
        let hms = hms_with(base_cfg(&temp));
        assert!(hms.auth().bootstrap_admin().await.unwrap().is_none());
        assert!(!hms.users().any_exist().await.unwrap());
    }
}
