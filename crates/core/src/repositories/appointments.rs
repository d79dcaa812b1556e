//! Appointment scheduling.
//!
//! A doctor (any user) cannot hold two live appointments whose slots overlap. Live means
//! `scheduled` or `checked_in`; finished, cancelled and missed appointments free the slot.

use super::custom_fields::{CustomFieldEntity, CustomFieldService, CustomValues};
use super::patients::PatientService;
use super::users::User;
use crate::constants::APPOINTMENTS;
use crate::store::{Collection, DocumentStore, Entity, Page, PageParams, Query, Stored};
use crate::validation::{optional_text, required_text};
use crate::{HmsError, HmsResult};
use chrono::{DateTime, Duration, Utc};
use hms_types::NonEmptyText;
use hms_uuid::DocumentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

pub const MIN_DURATION_MINUTES: u32 = 5;
pub const MAX_DURATION_MINUTES: u32 = 480;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::CheckedIn => "checked_in",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Whether the appointment still occupies the doctor's slot.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::CheckedIn
        )
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Scheduled, CheckedIn)
                | (CheckedIn, Completed)
                | (Scheduled, Cancelled)
                | (CheckedIn, Cancelled)
                | (Scheduled, NoShow)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Appointment {
    #[schema(value_type = String)]
    pub patient_id: DocumentId,
    #[schema(value_type = String)]
    pub doctor_id: DocumentId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    #[schema(value_type = String)]
    pub reason: NonEmptyText,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom: CustomValues,
}

impl Entity for Appointment {
    const COLLECTION: &'static str = APPOINTMENTS;
    const NAME: &'static str = "appointment";
}

impl Appointment {
    /// `None` when the slot runs past the last representable instant.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
            .checked_add_signed(Duration::minutes(i64::from(self.duration_minutes)))
    }

    fn overlaps(&self, other: &Appointment) -> bool {
        let end = |a: &Appointment| a.ends_at().unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.scheduled_at < end(other) && other.scheduled_at < end(self)
    }

    fn check_slot(&self) -> HmsResult<()> {
        match self.ends_at() {
            Some(_) => Ok(()),
            None => Err(HmsError::invalid(format!(
                "appointment at {} for {} minutes ends out of range",
                self.scheduled_at, self.duration_minutes
            ))),
        }
    }
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewAppointment {
    #[schema(value_type = String)]
    pub patient_id: DocumentId,
    #[schema(value_type = String)]
    pub doctor_id: DocumentId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub reason: String,
    pub notes: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom: CustomValues,
}

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct AppointmentUpdate {
    #[schema(value_type = Option<String>)]
    pub patient_id: Option<DocumentId>,
    #[schema(value_type = Option<String>)]
    pub doctor_id: Option<DocumentId>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom: CustomValues,
}

#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AppointmentQuery {
    #[param(value_type = Option<String>)]
    pub patient_id: Option<DocumentId>,
    #[param(value_type = Option<String>)]
    pub doctor_id: Option<DocumentId>,
    #[param(value_type = Option<String>)]
    pub status: Option<AppointmentStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn validate_duration(minutes: u32) -> HmsResult<u32> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(HmsError::invalid(format!(
            "duration_minutes must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES}"
        )));
    }
    Ok(minutes)
}

#[derive(Clone, Debug)]
pub struct AppointmentService {
    store: Arc<dyn DocumentStore>,
    appointments: Collection<Appointment>,
    users: Collection<User>,
}

impl AppointmentService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            appointments: Collection::new(store.clone()),
            users: Collection::new(store.clone()),
            store,
        }
    }

    pub async fn list(&self, query: AppointmentQuery) -> HmsResult<Page<Appointment>> {
        let mut q = Query::new();
        if let Some(patient_id) = query.patient_id {
            q = q.where_eq("patient_id", patient_id.to_string());
        }
        if let Some(doctor_id) = query.doctor_id {
            q = q.where_eq("doctor_id", doctor_id.to_string());
        }
        if let Some(status) = query.status {
            q = q.where_eq("status", status.as_str());
        }
        let page = PageParams::new(query.limit, query.offset);
        self.appointments.list(&page.apply(q)).await
    }

    pub async fn get(&self, id: &DocumentId) -> HmsResult<Stored<Appointment>> {
        self.appointments.require(id).await
    }

    async fn ensure_doctor(&self, doctor_id: &DocumentId) -> HmsResult<()> {
        match self.users.get(doctor_id).await? {
            Some(user) if user.data.active => Ok(()),
            Some(_) => Err(HmsError::invalid(format!("doctor {doctor_id} is inactive"))),
            None => Err(HmsError::invalid(format!("unknown doctor: {doctor_id}"))),
        }
    }

    /// Rejects `candidate` if it overlaps another live appointment of the same doctor.
    ///
    /// This is a read followed by a write, so two concurrent bookings of one slot can both
    /// pass. The store offers no range uniqueness to close that gap.
    async fn ensure_slot_free(
        &self,
        candidate: &Appointment,
        ignore: Option<&DocumentId>,
    ) -> HmsResult<()> {
        let booked = self
            .appointments
            .all(Query::new().where_eq("doctor_id", candidate.doctor_id.to_string()))
            .await?;
        let clash = booked.iter().find(|other| {
            Some(&other.id) != ignore && other.data.status.is_live() && other.data.overlaps(candidate)
        });
        match clash {
            Some(other) => Err(HmsError::Conflict(format!(
                "doctor {} already has appointment {} at {}",
                candidate.doctor_id, other.id, other.data.scheduled_at
            ))),
            None => Ok(()),
        }
    }

    pub async fn create(&self, input: NewAppointment) -> HmsResult<Stored<Appointment>> {
        let mut custom = input.custom;
        CustomFieldService::new(self.store.clone())
            .validate_values(CustomFieldEntity::Appointment, &mut custom)
            .await?;

        let appointment = Appointment {
            patient_id: input.patient_id,
            doctor_id: input.doctor_id,
            scheduled_at: input.scheduled_at,
            duration_minutes: validate_duration(input.duration_minutes)?,
            reason: required_text("reason", &input.reason)?,
            notes: optional_text("notes", input.notes)?,
            status: AppointmentStatus::Scheduled,
            custom,
        };
        appointment.check_slot()?;

        PatientService::ensure_patient(&self.store, &appointment.patient_id).await?;
        self.ensure_doctor(&appointment.doctor_id).await?;
        self.ensure_slot_free(&appointment, None).await?;

        let created = self.appointments.create(appointment).await?;
        tracing::info!(
            "scheduled appointment {} for patient {}",
            created.id,
            created.data.patient_id
        );
        Ok(created)
    }

    pub async fn update(
        &self,
        id: &DocumentId,
        input: AppointmentUpdate,
    ) -> HmsResult<Stored<Appointment>> {
        let current = self.appointments.require(id).await?;
        if current.data.status != AppointmentStatus::Scheduled {
            return Err(HmsError::Conflict(format!(
                "appointment {id} is {} and can no longer be edited",
                current.data.status
            )));
        }

        let mut next = current.data.clone();
        if let Some(patient_id) = input.patient_id {
            PatientService::ensure_patient(&self.store, &patient_id).await?;
            next.patient_id = patient_id;
        }
        if let Some(doctor_id) = input.doctor_id {
            self.ensure_doctor(&doctor_id).await?;
            next.doctor_id = doctor_id;
        }
        if let Some(at) = input.scheduled_at {
            next.scheduled_at = at;
        }
        if let Some(minutes) = input.duration_minutes {
            next.duration_minutes = validate_duration(minutes)?;
        }
        if let Some(reason) = &input.reason {
            next.reason = required_text("reason", reason)?;
        }
        if let Some(notes) = input.notes {
            next.notes = optional_text("notes", Some(notes))?;
        }
        if !input.custom.is_empty() {
            next.custom = CustomFieldService::new(self.store.clone())
                .merge_values(CustomFieldEntity::Appointment, &current.data.custom, input.custom)
                .await?;
        }

        let moved = next.doctor_id != current.data.doctor_id
            || next.scheduled_at != current.data.scheduled_at
            || next.duration_minutes != current.data.duration_minutes;
        if moved {
            next.check_slot()?;
            self.ensure_slot_free(&next, Some(id)).await?;
        }

        // A status change in between would make this replace fail with a conflict.
        self.appointments.replace(&current, next).await
    }

    pub async fn set_status(
        &self,
        id: &DocumentId,
        status: AppointmentStatus,
    ) -> HmsResult<Stored<Appointment>> {
        let updated = self
            .appointments
            .modify(id, |appointment| {
                if !appointment.status.can_transition_to(status) {
                    return Err(HmsError::InvalidTransition {
                        entity: Appointment::NAME,
                        from: appointment.status.to_string(),
                        to: status.to_string(),
                    });
                }
                appointment.status = status;
                Ok(())
            })
            .await?;
        tracing::info!("appointment {} is now {}", id, status);
        Ok(updated)
    }

    pub async fn delete(&self, id: &DocumentId) -> HmsResult<()> {
        if !self.appointments.delete(id).await? {
            return Err(HmsError::not_found(Appointment::NAME, id));
        }
        Ok(())
    }
}
