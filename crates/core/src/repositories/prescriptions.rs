//! Prescriptions: what was prescribed, dispensing it from stock, and billing it.
//!
//! Dispensing claims the prescription first (`active -> dispensed` under optimistic
//! concurrency) so that two pharmacists cannot both dispense it. Stock is then taken item by
//! item; if one item fails, the items already taken are put back and the claim is released.
//!
//! Conversion to an invoice uses an invoice id derived from the prescription id, so the
//! store's create uniqueness guarantees at most one invoice per prescription.

use super::appointments::Appointment;
use super::billing::{BillingService, Invoice, NewInvoiceItem};
use super::inventory::{InventoryService, Medication, MovementReason, StockAdjustment};
use super::patients::PatientService;
use crate::constants::{INVOICE_FOR_PRESCRIPTION_SCOPE, PRESCRIPTIONS};
use crate::store::{Collection, DocumentStore, Entity, Page, PageParams, Query, Stored};
use crate::validation::{optional_text, required_text};
use crate::{HmsError, HmsResult};
use chrono::{DateTime, Utc};
use hms_types::NonEmptyText;
use hms_uuid::DocumentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Draft,
    Active,
    Dispensed,
    Cancelled,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Draft => "draft",
            PrescriptionStatus::Active => "active",
            PrescriptionStatus::Dispensed => "dispensed",
            PrescriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PrescriptionItem {
    #[schema(value_type = String)]
    pub medication_id: DocumentId,
    pub quantity: u32,
    #[schema(value_type = String)]
    pub dosage: NonEmptyText,
    #[schema(value_type = String)]
    pub frequency: NonEmptyText,
    pub duration_days: Option<u32>,
    pub instructions: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Prescription {
    #[schema(value_type = String)]
    pub patient_id: DocumentId,
    #[schema(value_type = String)]
    pub prescriber_id: DocumentId,
    #[schema(value_type = Option<String>)]
    pub appointment_id: Option<DocumentId>,
    pub items: Vec<PrescriptionItem>,
    pub notes: Option<String>,
    pub status: PrescriptionStatus,
    #[schema(value_type = Option<String>)]
    pub invoice_id: Option<DocumentId>,
    pub dispensed_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>)]
    pub dispensed_by: Option<DocumentId>,
}

impl Entity for Prescription {
    const COLLECTION: &'static str = PRESCRIPTIONS;
    const NAME: &'static str = "prescription";
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewPrescriptionItem {
    #[schema(value_type = String)]
    pub medication_id: DocumentId,
    pub quantity: u32,
    pub dosage: String,
    pub frequency: String,
    pub duration_days: Option<u32>,
    pub instructions: Option<String>,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewPrescription {
    #[schema(value_type = String)]
    pub patient_id: DocumentId,
    #[schema(value_type = Option<String>)]
    pub appointment_id: Option<DocumentId>,
    pub items: Vec<NewPrescriptionItem>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct PrescriptionUpdate {
    /// Replaces all items.
    pub items: Option<Vec<NewPrescriptionItem>>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PrescriptionQuery {
    #[param(value_type = Option<String>)]
    pub patient_id: Option<DocumentId>,
    #[param(value_type = Option<String>)]
    pub prescriber_id: Option<DocumentId>,
    #[param(value_type = Option<String>)]
    pub status: Option<PrescriptionStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn invoice_id_for(prescription_id: &DocumentId) -> DocumentId {
    DocumentId::derived(INVOICE_FOR_PRESCRIPTION_SCOPE, &prescription_id.to_string())
}

fn describe(medication: &Medication) -> String {
    match &medication.strength {
        Some(strength) => format!("{} {}", medication.name, strength),
        None => medication.name.to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct PrescriptionService {
    store: Arc<dyn DocumentStore>,
    prescriptions: Collection<Prescription>,
    medications: Collection<Medication>,
    appointments: Collection<Appointment>,
}

impl PrescriptionService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            prescriptions: Collection::new(store.clone()),
            medications: Collection::new(store.clone()),
            appointments: Collection::new(store.clone()),
            store,
        }
    }

    fn inventory(&self) -> InventoryService {
        InventoryService::new(self.store.clone())
    }

    fn billing(&self) -> BillingService {
        BillingService::new(self.store.clone())
    }

    pub async fn list(&self, query: PrescriptionQuery) -> HmsResult<Page<Prescription>> {
        let mut q = Query::new();
        if let Some(patient_id) = query.patient_id {
            q = q.where_eq("patient_id", patient_id.to_string());
        }
        if let Some(prescriber_id) = query.prescriber_id {
            q = q.where_eq("prescriber_id", prescriber_id.to_string());
        }
        if let Some(status) = query.status {
            q = q.where_eq("status", status.as_str());
        }
        let page = PageParams::new(query.limit, query.offset);
        self.prescriptions.list(&page.apply(q)).await
    }

    pub async fn get(&self, id: &DocumentId) -> HmsResult<Stored<Prescription>> {
        self.prescriptions.require(id).await
    }

    async fn validate_items(
        &self,
        items: Vec<NewPrescriptionItem>,
    ) -> HmsResult<Vec<PrescriptionItem>> {
        if items.is_empty() {
            return Err(HmsError::invalid("a prescription needs at least one item"));
        }

        let mut validated = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity == 0 {
                return Err(HmsError::invalid("item quantity must be positive"));
            }
            if item.duration_days == Some(0) {
                return Err(HmsError::invalid("duration_days must be positive"));
            }
            if self.medications.get(&item.medication_id).await?.is_none() {
                return Err(HmsError::invalid(format!(
                    "unknown medication: {}",
                    item.medication_id
                )));
            }
            validated.push(PrescriptionItem {
                medication_id: item.medication_id,
                quantity: item.quantity,
                dosage: required_text("dosage", &item.dosage)?,
                frequency: required_text("frequency", &item.frequency)?,
                duration_days: item.duration_days,
                instructions: optional_text("instructions", item.instructions)?,
            });
        }
        Ok(validated)
    }

    /// Creates a draft prescribed by `prescriber_id`.
    pub async fn create(
        &self,
        input: NewPrescription,
        prescriber_id: DocumentId,
    ) -> HmsResult<Stored<Prescription>> {
        PatientService::ensure_patient(&self.store, &input.patient_id).await?;
        if let Some(appointment_id) = &input.appointment_id {
            match self.appointments.get(appointment_id).await? {
                Some(appt) if appt.data.patient_id == input.patient_id => {}
                Some(_) => {
                    return Err(HmsError::invalid(format!(
                        "appointment {appointment_id} belongs to another patient"
                    )))
                }
                None => {
                    return Err(HmsError::invalid(format!(
                        "unknown appointment: {appointment_id}"
                    )))
                }
            }
        }
        let items = self.validate_items(input.items).await?;

        let prescription = Prescription {
            patient_id: input.patient_id,
            prescriber_id,
            appointment_id: input.appointment_id,
            items,
            notes: optional_text("notes", input.notes)?,
            status: PrescriptionStatus::Draft,
            invoice_id: None,
            dispensed_at: None,
            dispensed_by: None,
        };
        let created = self.prescriptions.create(prescription).await?;
        tracing::info!(
            "created prescription {} for patient {}",
            created.id,
            created.data.patient_id
        );
        Ok(created)
    }

    pub async fn update(
        &self,
        id: &DocumentId,
        input: PrescriptionUpdate,
    ) -> HmsResult<Stored<Prescription>> {
        let items = match input.items {
            Some(items) => Some(self.validate_items(items).await?),
            None => None,
        };
        let notes = input
            .notes
            .map(|n| optional_text("notes", Some(n)))
            .transpose()?;

        self.prescriptions
            .modify(id, |p| {
                if p.status != PrescriptionStatus::Draft {
                    return Err(HmsError::Conflict(format!(
                        "prescription {id} is {} and can no longer be edited",
                        p.status
                    )));
                }
                if let Some(items) = &items {
                    p.items = items.clone();
                }
                if let Some(notes) = &notes {
                    p.notes = notes.clone();
                }
                Ok(())
            })
            .await
    }

    /// Activates or cancels a prescription. `dispensed` is reached through [`Self::dispense`].
    pub async fn set_status(
        &self,
        id: &DocumentId,
        status: PrescriptionStatus,
    ) -> HmsResult<Stored<Prescription>> {
        let allowed_from: &[PrescriptionStatus] = match status {
            PrescriptionStatus::Active => &[PrescriptionStatus::Draft],
            PrescriptionStatus::Cancelled => {
                &[PrescriptionStatus::Draft, PrescriptionStatus::Active]
            }
            other => {
                return Err(HmsError::invalid(format!(
                    "status {other} cannot be set directly"
                )))
            }
        };

        let updated = self
            .prescriptions
            .modify(id, |p| {
                if !allowed_from.contains(&p.status) {
                    return Err(HmsError::InvalidTransition {
                        entity: Prescription::NAME,
                        from: p.status.to_string(),
                        to: status.to_string(),
                    });
                }
                p.status = status;
                Ok(())
            })
            .await?;
        tracing::info!("prescription {} is now {}", id, status);
        Ok(updated)
    }

    pub async fn delete(&self, id: &DocumentId) -> HmsResult<()> {
        let current = self.prescriptions.require(id).await?;
        if !matches!(
            current.data.status,
            PrescriptionStatus::Draft | PrescriptionStatus::Cancelled
        ) {
            return Err(HmsError::Conflict(format!(
                "prescription {id} is {} and cannot be deleted",
                current.data.status
            )));
        }
        self.prescriptions.delete(id).await?;
        Ok(())
    }

    /// Dispenses an active prescription, taking every item out of stock.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` unless the prescription is `active`
    /// - `InsufficientStock` (or any store error) from the first item that cannot be taken;
    ///   stock already taken for earlier items is returned and the prescription stays
    ///   `active`
    pub async fn dispense(
        &self,
        id: &DocumentId,
        actor_id: DocumentId,
    ) -> HmsResult<Stored<Prescription>> {
        let now = Utc::now();
        let claimed = self
            .prescriptions
            .modify(id, |p| {
                if p.status != PrescriptionStatus::Active {
                    return Err(HmsError::InvalidTransition {
                        entity: Prescription::NAME,
                        from: p.status.to_string(),
                        to: PrescriptionStatus::Dispensed.to_string(),
                    });
                }
                p.status = PrescriptionStatus::Dispensed;
                p.dispensed_at = Some(now);
                p.dispensed_by = Some(actor_id);
                Ok(())
            })
            .await?;

        let inventory = self.inventory();
        let mut taken: Vec<&PrescriptionItem> = Vec::with_capacity(claimed.data.items.len());
        for item in &claimed.data.items {
            let adjustment = StockAdjustment {
                delta: -i64::from(item.quantity),
                reason: MovementReason::Dispensed,
                note: None,
            };
            match inventory
                .adjust_stock(&item.medication_id, adjustment, Some(actor_id), Some(*id))
                .await
            {
                Ok(_) => taken.push(item),
                Err(e) => {
                    self.undo_dispense(id, &taken, actor_id).await;
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "dispensed prescription {} ({} items)",
            id,
            claimed.data.items.len()
        );
        Ok(claimed)
    }

    /// Best effort: failures are logged, the original error is what the caller sees.
    async fn undo_dispense(&self, id: &DocumentId, taken: &[&PrescriptionItem], actor_id: DocumentId) {
        let inventory = self.inventory();
        for item in taken {
            let reversal = StockAdjustment {
                delta: i64::from(item.quantity),
                reason: MovementReason::Correction,
                note: Some(format!("reversal of failed dispense of prescription {id}")),
            };
            if let Err(e) = inventory
                .adjust_stock(&item.medication_id, reversal, Some(actor_id), Some(*id))
                .await
            {
                tracing::error!(
                    "failed to return {} of medication {} after failed dispense of {}: {}",
                    item.quantity,
                    item.medication_id,
                    id,
                    e
                );
            }
        }

        let released = self
            .prescriptions
            .modify(id, |p| {
                p.status = PrescriptionStatus::Active;
                p.dispensed_at = None;
                p.dispensed_by = None;
                Ok(())
            })
            .await;
        if let Err(e) = released {
            tracing::error!("failed to release prescription {} after failed dispense: {}", id, e);
        }
    }

    /// Bills an active or dispensed prescription at current medication prices.
    ///
    /// # Errors
    ///
    /// - `Conflict` unless the prescription is `active` or `dispensed`, or if an item's
    ///   medication no longer exists
    /// - `AlreadyExists` if the prescription was already invoiced
    pub async fn convert_to_invoice(&self, id: &DocumentId) -> HmsResult<Stored<Invoice>> {
        let prescription = self.prescriptions.require(id).await?;
        if !matches!(
            prescription.data.status,
            PrescriptionStatus::Active | PrescriptionStatus::Dispensed
        ) {
            return Err(HmsError::Conflict(format!(
                "prescription {id} is {} and cannot be invoiced",
                prescription.data.status
            )));
        }

        let mut lines = Vec::with_capacity(prescription.data.items.len());
        for item in &prescription.data.items {
            let medication = self.medications.get(&item.medication_id).await?.ok_or_else(|| {
                HmsError::Conflict(format!(
                    "medication {} of prescription {id} no longer exists",
                    item.medication_id
                ))
            })?;
            lines.push(NewInvoiceItem {
                description: describe(&medication.data),
                quantity: item.quantity,
                unit_price: medication.data.unit_price,
            });
        }

        let invoice_id = invoice_id_for(id);
        let invoice = self
            .billing()
            .create_issued_with_id(invoice_id, prescription.data.patient_id, Some(*id), lines)
            .await?;

        let linked = self
            .prescriptions
            .modify(id, |p| {
                p.invoice_id = Some(invoice_id);
                Ok(())
            })
            .await;
        if let Err(e) = linked {
            // The invoice stays reachable through its derived id.
            tracing::error!("failed to link invoice {} to prescription {}: {}", invoice_id, id, e);
        }

        tracing::info!(
            "converted prescription {} into invoice {} ({})",
            id,
            invoice.data.number,
            invoice.data.amount
        );
        Ok(invoice)
    }
}
