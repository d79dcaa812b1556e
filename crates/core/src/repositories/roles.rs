//! Roles group permissions; users hold role ids.

use crate::auth::Permission;
use crate::constants::{ROLES, USERS};
use crate::store::{Collection, Entity, FilterOp, Page, PageParams, Query, Stored};
use crate::validation::{optional_text, required_text};
use crate::{HmsError, HmsResult};
use hms_types::NonEmptyText;
use hms_uuid::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use utoipa::ToSchema;

use super::users::User;
use crate::store::DocumentStore;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    #[schema(value_type = String)]
    pub name: NonEmptyText,
    pub description: Option<String>,
    pub permissions: BTreeSet<Permission>,
}

impl Entity for Role {
    const COLLECTION: &'static str = ROLES;
    const NAME: &'static str = "role";
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
}

/// Absent fields are left unchanged.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<BTreeSet<Permission>>,
}

#[derive(Clone, Debug)]
pub struct RoleService {
    roles: Collection<Role>,
    users: Collection<User>,
}

impl RoleService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            roles: Collection::new(store.clone()),
            users: Collection::new(store),
        }
    }

    pub async fn list(&self, page: PageParams) -> HmsResult<Page<Role>> {
        self.roles.list(&page.apply(Query::new())).await
    }

    pub async fn get(&self, id: &DocumentId) -> HmsResult<Stored<Role>> {
        self.roles.require(id).await
    }

    pub async fn create(&self, input: NewRole) -> HmsResult<Stored<Role>> {
        let role = Role {
            name: required_text("name", &input.name)?,
            description: optional_text("description", input.description)?,
            permissions: input.permissions,
        };
        let created = self.roles.create(role).await?;
        tracing::info!("created role {} ({})", created.data.name, created.id);
        Ok(created)
    }

    /// Creates a role at a fixed id; used by bootstrap.
    pub(crate) async fn create_with_id(&self, id: DocumentId, role: Role) -> HmsResult<Stored<Role>> {
        self.roles.create_with_id(id, role).await
    }

    pub async fn update(&self, id: &DocumentId, input: RoleUpdate) -> HmsResult<Stored<Role>> {
        let name = input
            .name
            .as_deref()
            .map(|n| required_text("name", n))
            .transpose()?;
        let description = match input.description {
            Some(d) => Some(optional_text("description", Some(d))?),
            None => None,
        };

        self.roles
            .modify(id, |role| {
                if let Some(name) = &name {
                    role.name = name.clone();
                }
                if let Some(description) = &description {
                    role.description = description.clone();
                }
                if let Some(permissions) = &input.permissions {
                    role.permissions = permissions.clone();
                }
                Ok(())
            })
            .await
    }

    /// Deletes a role that no user holds.
    pub async fn delete(&self, id: &DocumentId) -> HmsResult<()> {
        self.roles.require(id).await?;

        let in_use = self
            .users
            .exists(Query::new().filter("role_ids", FilterOp::Contains, id.to_string()))
            .await?;
        if in_use {
            return Err(HmsError::Conflict(format!(
                "role {id} is still assigned to at least one user"
            )));
        }

        self.roles.delete(id).await?;
        tracing::info!("deleted role {}", id);
        Ok(())
    }

    /// Fails with `InvalidInput` naming the first id that is not a role.
    pub async fn ensure_exist(&self, ids: &[DocumentId]) -> HmsResult<()> {
        for id in ids {
            if self.roles.get(id).await?.is_none() {
                return Err(HmsError::invalid(format!("unknown role: {id}")));
            }
        }
        Ok(())
    }

    /// Union of the permissions of the given roles. Missing roles contribute nothing.
    pub async fn permissions_for(&self, ids: &[DocumentId]) -> HmsResult<BTreeSet<Permission>> {
        let mut permissions = BTreeSet::new();
        for id in ids {
            match self.roles.get(id).await? {
                Some(role) => permissions.extend(role.data.permissions),
                None => tracing::warn!("user references missing role {}", id),
            }
        }
        Ok(permissions)
    }
}
