//! # HMS Core
//!
//! Core business logic for the HMS hospital administration system.
//!
//! This crate contains the domain entities and the services that operate on them:
//! - Patients with attachments kept in object storage
//! - Appointments, prescriptions, inventory and billing
//! - Users, roles, sessions and custom field definitions
//! - The document store abstraction and its backends
//!
//! **No API concerns**: HTTP servers, cookies and request extraction belong in `api-rest`
//! and `api-shared`. Permission *checks* live here (see [`auth::AuthContext`]) so that every
//! surface enforces the same rules.

pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod repositories;
pub mod store;
pub mod validation;

pub use auth::{AuthContext, AuthService, Permission};
pub use config::{BootstrapAdmin, CoreConfig, StoreBackend};
pub use error::{HmsError, HmsResult};
pub use hms_files::FilesError;
pub use hms_types::{EmailAddress, Money, NonEmptyText};
pub use hms_uuid::DocumentId;

use repositories::{
    appointments::AppointmentService, billing::BillingService,
    custom_fields::CustomFieldService, inventory::InventoryService, patients::PatientService,
    prescriptions::PrescriptionService, roles::RoleService, users::UserService,
};
use std::sync::Arc;
use store::DocumentStore;

/// Entry point bundling configuration and the document store.
///
/// Services are cheap to construct; callers ask for one per operation.
#[derive(Clone, Debug)]
pub struct Hms {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn DocumentStore>,
}

impl Hms {
    pub fn new(cfg: Arc<CoreConfig>, store: Arc<dyn DocumentStore>) -> Self {
        Self { cfg, store }
    }

    /// Opens the configured store backend.
    pub fn open(cfg: Arc<CoreConfig>) -> HmsResult<Self> {
        let store = store::open_store(&cfg)?;
        Ok(Self::new(cfg, store))
    }

    pub fn cfg(&self) -> &Arc<CoreConfig> {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn auth(&self) -> AuthService {
        AuthService::new(self.cfg.clone(), self.store.clone())
    }

    pub fn users(&self) -> UserService {
        UserService::new(self.cfg.clone(), self.store.clone())
    }

    pub fn roles(&self) -> RoleService {
        RoleService::new(self.store.clone())
    }

    pub fn custom_fields(&self) -> CustomFieldService {
        CustomFieldService::new(self.store.clone())
    }

    pub fn patients(&self) -> PatientService {
        PatientService::new(self.cfg.clone(), self.store.clone())
    }

    pub fn appointments(&self) -> AppointmentService {
        AppointmentService::new(self.store.clone())
    }

    pub fn inventory(&self) -> InventoryService {
        InventoryService::new(self.store.clone())
    }

    pub fn prescriptions(&self) -> PrescriptionService {
        PrescriptionService::new(self.store.clone())
    }

    pub fn billing(&self) -> BillingService {
        BillingService::new(self.store.clone())
    }
}

/// Runs blocking work (hashing, object storage I/O) off the async worker threads.
pub(crate) async fn blocking<T, F>(work: F) -> HmsResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> HmsResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| HmsError::Task(e.to_string()))?
}
