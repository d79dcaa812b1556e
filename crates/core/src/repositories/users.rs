//! Staff accounts.
//!
//! A user is spread over three documents:
//!
//! - `users/<id>`: the profile returned by the API
//! - `credentials/<id>`: the password hash, never serialised to clients
//! - `user_emails/<derived id of email>`: claims an e-mail address
//!
//! The e-mail claim is always written first. Because its id is derived from the lowercase
//! address, two concurrent registrations of the same address cannot both succeed: the store
//! rejects the second create. Later steps that fail undo the earlier ones.

use super::roles::RoleService;
use crate::auth::password::{hash_password, validate_password, verify_password};
use crate::constants::{CREDENTIALS, EMAIL_ID_SCOPE, SESSIONS, USERS, USER_EMAILS};
use crate::store::{Collection, DocumentStore, Entity, Page, PageParams, Query, Stored};
use crate::validation::{optional_text, required_text, validate_phone};
use crate::{blocking, CoreConfig, HmsError, HmsResult};
use hms_types::{EmailAddress, NonEmptyText};
use hms_uuid::DocumentId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    #[schema(value_type = String)]
    pub email: EmailAddress,
    #[schema(value_type = String)]
    pub full_name: NonEmptyText,
    #[schema(value_type = Vec<String>)]
    pub role_ids: Vec<DocumentId>,
    pub active: bool,
    pub phone: Option<String>,
    pub department: Option<String>,
}

impl Entity for User {
    const COLLECTION: &'static str = USERS;
    const NAME: &'static str = "user";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct Credential {
    pub password_hash: String,
}

impl Entity for Credential {
    const COLLECTION: &'static str = CREDENTIALS;
    const NAME: &'static str = "credential";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct UserEmail {
    pub user_id: DocumentId,
}

impl Entity for UserEmail {
    const COLLECTION: &'static str = USER_EMAILS;
    const NAME: &'static str = "email";
}

fn email_id(email: &EmailAddress) -> DocumentId {
    DocumentId::derived(EMAIL_ID_SCOPE, email.as_str())
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub password: String,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub role_ids: Vec<DocumentId>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub active: Option<bool>,
}

/// Absent fields are left unchanged; `""` clears optional text.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub full_name: Option<String>,
    #[schema(value_type = Option<Vec<String>>)]
    pub role_ids: Option<Vec<DocumentId>>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub active: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    /// Matches name or e-mail.
    pub search: Option<String>,
    #[param(value_type = Option<String>)]
    pub role_id: Option<DocumentId>,
    pub active: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct UserService {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn DocumentStore>,
    users: Collection<User>,
    credentials: Collection<Credential>,
    emails: Collection<UserEmail>,
}

impl UserService {
    pub fn new(cfg: Arc<CoreConfig>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            cfg,
            users: Collection::new(store.clone()),
            credentials: Collection::new(store.clone()),
            emails: Collection::new(store.clone()),
            store,
        }
    }

    fn roles(&self) -> RoleService {
        RoleService::new(self.store.clone())
    }

    pub async fn list(&self, query: UserQuery) -> HmsResult<Page<User>> {
        let mut q = Query::new();
        if let Some(search) = &query.search {
            q = q.search(&["full_name", "email"], search);
        }
        if let Some(role_id) = query.role_id {
            q = q.filter(
                "role_ids",
                crate::store::FilterOp::Contains,
                role_id.to_string(),
            );
        }
        if let Some(active) = query.active {
            q = q.where_eq("active", active);
        }
        let page = PageParams::new(query.limit, query.offset);
        self.users.list(&page.apply(q)).await
    }

    pub async fn get(&self, id: &DocumentId) -> HmsResult<Stored<User>> {
        self.users.require(id).await
    }

    /// Whether any account exists at all.
    pub async fn any_exist(&self) -> HmsResult<bool> {
        self.users.exists(Query::new()).await
    }

    pub async fn create(&self, input: NewUser) -> HmsResult<Stored<User>> {
        let email = EmailAddress::parse(&input.email)?;
        let full_name = required_text("full_name", &input.full_name)?;
        let phone = optional_text("phone", input.phone)?;
        if let Some(phone) = &phone {
            validate_phone(phone)?;
        }
        let department = optional_text("department", input.department)?;
        validate_password(&input.password)?;
        self.roles().ensure_exist(&input.role_ids).await?;

        let user = User {
            email,
            full_name,
            role_ids: dedup(input.role_ids),
            active: input.active.unwrap_or(true),
            phone,
            department,
        };
        self.create_user(user, input.password).await
    }

    /// Writes the e-mail claim, then the profile, then the credential.
    pub(crate) async fn create_user(&self, user: User, password: String) -> HmsResult<Stored<User>> {
        let iterations = self.cfg.password_iterations();
        let password_hash = blocking(move || hash_password(&password, iterations)).await?;

        let id = DocumentId::new();
        let claim = email_id(&user.email);
        self.claim_email(&user.email, id).await?;

        let created = match self.users.create_with_id(id, user).await {
            Ok(created) => created,
            Err(e) => {
                self.release_email(&claim).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .credentials
            .create_with_id(id, Credential { password_hash })
            .await
        {
            if let Err(cleanup) = self.users.delete(&id).await {
                tracing::error!("failed to remove user {} after credential error: {:?}", id, cleanup);
            }
            self.release_email(&claim).await;
            return Err(e);
        }

        tracing::info!("created user {} ({})", created.data.email, created.id);
        Ok(created)
    }

    async fn claim_email(&self, email: &EmailAddress, user_id: DocumentId) -> HmsResult<()> {
        match self
            .emails
            .create_with_id(email_id(email), UserEmail { user_id })
            .await
        {
            Ok(_) => Ok(()),
            Err(HmsError::AlreadyExists { .. }) => Err(HmsError::AlreadyExists {
                entity: "user",
                detail: format!("email {email} is already in use"),
            }),
            Err(e) => Err(e),
        }
    }

    async fn release_email(&self, claim: &DocumentId) {
        if let Err(e) = self.emails.delete(claim).await {
            tracing::error!("failed to release email claim {}: {:?}", claim, e);
        }
    }

    pub async fn update(&self, id: &DocumentId, input: UserUpdate) -> HmsResult<Stored<User>> {
        let current = self.users.require(id).await?;

        let email = input.email.as_deref().map(EmailAddress::parse).transpose()?;
        let full_name = input
            .full_name
            .as_deref()
            .map(|n| required_text("full_name", n))
            .transpose()?;
        let phone = match input.phone {
            Some(p) => {
                let p = optional_text("phone", Some(p))?;
                if let Some(p) = &p {
                    validate_phone(p)?;
                }
                Some(p)
            }
            None => None,
        };
        let department = match input.department {
            Some(d) => Some(optional_text("department", Some(d))?),
            None => None,
        };
        let role_ids = input.role_ids.map(dedup);
        if let Some(role_ids) = &role_ids {
            self.roles().ensure_exist(role_ids).await?;
        }

        let new_email = email.filter(|e| *e != current.data.email);
        if let Some(new_email) = &new_email {
            self.claim_email(new_email, *id).await?;
        }

        let result = self
            .users
            .modify(id, |user| {
                if let Some(email) = &new_email {
                    user.email = email.clone();
                }
                if let Some(full_name) = &full_name {
                    user.full_name = full_name.clone();
                }
                if let Some(role_ids) = &role_ids {
                    user.role_ids = role_ids.clone();
                }
                if let Some(phone) = &phone {
                    user.phone = phone.clone();
                }
                if let Some(department) = &department {
                    user.department = department.clone();
                }
                if let Some(active) = input.active {
                    user.active = active;
                }
                Ok(())
            })
            .await;

        match (result, new_email) {
            (Ok(updated), Some(_)) => {
                self.release_email(&email_id(&current.data.email)).await;
                Ok(updated)
            }
            (Ok(updated), None) => Ok(updated),
            (Err(e), Some(new_email)) => {
                self.release_email(&email_id(&new_email)).await;
                Err(e)
            }
            (Err(e), None) => Err(e),
        }
    }

    pub async fn set_password(&self, id: &DocumentId, password: String) -> HmsResult<()> {
        validate_password(&password)?;
        self.users.require(id).await?;

        let iterations = self.cfg.password_iterations();
        let password_hash = blocking(move || hash_password(&password, iterations)).await?;

        match self.credentials.get(id).await? {
            Some(_) => {
                self.credentials
                    .modify(id, |credential| {
                        credential.password_hash = password_hash.clone();
                        Ok(())
                    })
                    .await?;
            }
            None => {
                self.credentials
                    .create_with_id(*id, Credential { password_hash })
                    .await?;
            }
        }

        tracing::info!("password changed for user {}", id);
        Ok(())
    }

    /// Deletes a user, their credential, e-mail claim and sessions.
    pub async fn delete(&self, actor_id: &DocumentId, id: &DocumentId) -> HmsResult<()> {
        if actor_id == id {
            return Err(HmsError::invalid("you cannot delete your own account"));
        }
        let user = self.users.require(id).await?;

        self.users.delete(id).await?;
        self.credentials.delete(id).await?;
        self.release_email(&email_id(&user.data.email)).await;

        let sessions = self
            .store
            .list(SESSIONS, &Query::new().where_eq("user_id", id.to_string()))
            .await?;
        for session in sessions.documents {
            self.store.delete(SESSIONS, &session.id).await?;
        }

        tracing::info!("deleted user {}", id);
        Ok(())
    }

    /// Resolves e-mail and password to an active user.
    ///
    /// Every failure mode answers `InvalidCredentials`, so callers cannot tell an unknown
    /// e-mail from a wrong password or a disabled account.
    pub async fn verify_credentials(&self, email: &str, password: &str) -> HmsResult<Stored<User>> {
        let email = EmailAddress::parse(email).map_err(|_| HmsError::InvalidCredentials)?;
        let claim = self
            .emails
            .get(&email_id(&email))
            .await?
            .ok_or(HmsError::InvalidCredentials)?;
        let user = self
            .users
            .get(&claim.data.user_id)
            .await?
            .ok_or(HmsError::InvalidCredentials)?;
        let credential = self
            .credentials
            .get(&user.id)
            .await?
            .ok_or(HmsError::InvalidCredentials)?;

        let password = password.to_string();
        let hash = credential.data.password_hash;
        let ok = blocking(move || Ok(verify_password(&password, &hash))).await?;

        if !ok || !user.data.active {
            return Err(HmsError::InvalidCredentials);
        }
        Ok(user)
    }
}

fn dedup(mut ids: Vec<DocumentId>) -> Vec<DocumentId> {
    ids.sort();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::roles::NewRole;
    use crate::test_support::test_hms;
    use crate::Permission;
    use tempfile::TempDir;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            full_name: "Grace Hopper".into(),
            password: "s3cret-pass".into(),
            role_ids: vec![],
            phone: None,
            department: Some("Cardiology".into()),
            active: None,
        }
    }

    #[tokio::test]
    async fn create_and_verify_credentials() {
        let temp = TempDir::new().unwrap();
        let users = test_hms(temp.path()).users();

        let created = users.create(new_user("Grace@Example.org")).await.unwrap();
        assert_eq!(created.data.email.as_str(), "grace@example.org");
        assert!(created.data.active);

        let verified = users
            .verify_credentials("grace@example.org", "s3cret-pass")
            .await
            .unwrap();
        assert_eq!(verified.id, created.id);

        for (email, password) in [
            ("grace@example.org", "wrong-pass"),
            ("nobody@example.org", "s3cret-pass"),
            ("not-an-email", "s3cret-pass"),
        ] {
            let err = users.verify_credentials(email, password).await.unwrap_err();
            assert!(matches!(err, HmsError::InvalidCredentials));
        }
    }

    #[tokio::test]
    async fn emails_are_unique_case_insensitively() {
        let temp = TempDir::new().unwrap();
        let users = test_hms(temp.path()).users();
        users.create(new_user("ada@example.org")).await.unwrap();

        let err = users.create(new_user("ADA@example.org")).await.unwrap_err();
        assert!(matches!(err, HmsError::AlreadyExists { .. }));
        assert_eq!(users.list(UserQuery::default()).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn changing_email_moves_the_claim() {
        let temp = TempDir::new().unwrap();
        let users = test_hms(temp.path()).users();
        let ada = users.create(new_user("ada@example.org")).await.unwrap();
        users.create(new_user("bob@example.org")).await.unwrap();

        let err = users
            .update(
                &ada.id,
                UserUpdate {
                    email: Some("bob@example.org".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HmsError::AlreadyExists { .. }));

        users
            .update(
                &ada.id,
                UserUpdate {
                    email: Some("lovelace@example.org".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // The old address is free again and the new one logs in.
        users.create(new_user("ada@example.org")).await.unwrap();
        users
            .verify_credentials("lovelace@example.org", "s3cret-pass")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn inactive_users_cannot_log_in() {
        let temp = TempDir::new().unwrap();
        let users = test_hms(temp.path()).users();
        let mut input = new_user("off@example.org");
        input.active = Some(false);
        users.create(input).await.unwrap();

        let err = users
            .verify_credentials("off@example.org", "s3cret-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, HmsError::InvalidCredentials));
    }

    #[tokio::test]
    async fn unknown_roles_and_short_passwords_are_rejected() {
        let temp = TempDir::new().unwrap();
        let hms = test_hms(temp.path());
        let users = hms.users();

        let mut input = new_user("a@example.org");
        input.role_ids = vec![DocumentId::new()];
        assert!(matches!(
            users.create(input).await.unwrap_err(),
            HmsError::InvalidInput(_)
        ));

        let mut input = new_user("a@example.org");
        input.password = "short".into();
        assert!(matches!(
            users.create(input).await.unwrap_err(),
            HmsError::InvalidInput(_)
        ));

        let role = hms
            .roles()
            .create(NewRole {
                name: "Doctor".into(),
                description: None,
                permissions: [Permission::PatientsRead].into(),
            })
            .await
            .unwrap();
        let mut input = new_user("a@example.org");
        input.role_ids = vec![role.id, role.id];
        let created = users.create(input).await.unwrap();
        assert_eq!(created.data.role_ids, vec![role.id]);
    }

    #[tokio::test]
    async fn set_password_and_delete() {
        let temp = TempDir::new().unwrap();
        let users = test_hms(temp.path()).users();
        let admin = users.create(new_user("admin@example.org")).await.unwrap();
        let user = users.create(new_user("user@example.org")).await.unwrap();

        users
            .set_password(&user.id, "another-pass".into())
            .await
            .unwrap();
        users
            .verify_credentials("user@example.org", "another-pass")
            .await
            .unwrap();

        assert!(matches!(
            users.delete(&admin.id, &admin.id).await.unwrap_err(),
            HmsError::InvalidInput(_)
        ));

        users.delete(&admin.id, &user.id).await.unwrap();
        assert!(users
            .verify_credentials("user@example.org", "another-pass")
            .await
            .is_err());
        users.create(new_user("user@example.org")).await.unwrap();
    }
}
