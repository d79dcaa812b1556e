//! Medications and their stock ledger.
//!
//! Stock only changes through [`InventoryService::adjust_stock`], which applies the delta
//! under optimistic concurrency and then records a [`StockMovement`]. The quantity can
//! never drop below zero: an adjustment that would do so fails with
//! [`HmsError::InsufficientStock`] and leaves the medication untouched.

use super::custom_fields::{CustomFieldEntity, CustomFieldService, CustomValues};
use super::nullable;
use crate::constants::{MEDICATIONS, STOCK_MOVEMENTS};
use crate::store::{Collection, DocumentStore, Entity, Page, PageParams, Query, Stored};
use crate::validation::{optional_text, required_text};
use crate::{HmsError, HmsResult};
use chrono::NaiveDate;
use hms_types::{Money, NonEmptyText};
use hms_uuid::DocumentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DosageForm {
    Tablet,
    Capsule,
    Syrup,
    Injection,
    Ointment,
    Drops,
    Inhaler,
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Medication {
    #[schema(value_type = String)]
    pub name: NonEmptyText,
    pub generic_name: Option<String>,
    pub form: DosageForm,
    pub strength: Option<String>,
    /// Unit the stock is counted in, e.g. "tablet" or "bottle".
    #[schema(value_type = String)]
    pub unit: NonEmptyText,
    /// Price per unit in minor currency units.
    #[schema(value_type = i64)]
    pub unit_price: Money,
    pub stock_quantity: i64,
    pub reorder_level: i64,
    pub expiry_date: Option<NaiveDate>,
    pub active: bool,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom: CustomValues,
}

impl Entity for Medication {
    const COLLECTION: &'static str = MEDICATIONS;
    const NAME: &'static str = "medication";
}

impl Medication {
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.reorder_level
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    /// Opening balance recorded when a medication is created with stock.
    Initial,
    Purchase,
    Dispensed,
    Returned,
    Expired,
    Damaged,
    /// Manual stocktake correction, or the reversal of a failed operation.
    Correction,
}

impl MovementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::Initial => "initial",
            MovementReason::Purchase => "purchase",
            MovementReason::Dispensed => "dispensed",
            MovementReason::Returned => "returned",
            MovementReason::Expired => "expired",
            MovementReason::Damaged => "damaged",
            MovementReason::Correction => "correction",
        }
    }

    fn check_sign(&self, delta: i64) -> HmsResult<()> {
        // Every accepted delta must be reversible.
        if delta == i64::MIN {
            return Err(HmsError::invalid(format!("delta {delta} is out of range")));
        }
        let ok = match self {
            MovementReason::Initial | MovementReason::Purchase | MovementReason::Returned => {
                delta > 0
            }
            MovementReason::Dispensed | MovementReason::Expired | MovementReason::Damaged => {
                delta < 0
            }
            MovementReason::Correction => delta != 0,
        };
        if ok {
            Ok(())
        } else {
            Err(HmsError::invalid(format!(
                "delta {delta} does not match reason {self}"
            )))
        }
    }
}

impl fmt::Display for MovementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementReason {
    type Err = HmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            MovementReason::Initial,
            MovementReason::Purchase,
            MovementReason::Dispensed,
            MovementReason::Returned,
            MovementReason::Expired,
            MovementReason::Damaged,
            MovementReason::Correction,
        ]
        .into_iter()
        .find(|r| r.as_str() == s)
        .ok_or_else(|| HmsError::invalid(format!("unknown movement reason: {s}")))
    }
}

/// One entry of the stock ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StockMovement {
    #[schema(value_type = String)]
    pub medication_id: DocumentId,
    pub delta: i64,
    pub resulting_quantity: i64,
    pub reason: MovementReason,
    pub note: Option<String>,
    #[schema(value_type = Option<String>)]
    pub actor_id: Option<DocumentId>,
    #[schema(value_type = Option<String>)]
    pub prescription_id: Option<DocumentId>,
}

impl Entity for StockMovement {
    const COLLECTION: &'static str = STOCK_MOVEMENTS;
    const NAME: &'static str = "stock movement";
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewMedication {
    pub name: String,
    pub generic_name: Option<String>,
    pub form: DosageForm,
    pub strength: Option<String>,
    pub unit: String,
    #[schema(value_type = i64)]
    pub unit_price: Money,
    /// Opening stock, recorded as an `initial` movement.
    #[serde(default)]
    pub stock_quantity: i64,
    #[serde(default)]
    pub reorder_level: i64,
    pub expiry_date: Option<NaiveDate>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom: CustomValues,
}

/// Partial update. Stock is deliberately absent: it changes through stock adjustments only.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct MedicationUpdate {
    pub name: Option<String>,
    pub generic_name: Option<String>,
    pub form: Option<DosageForm>,
    pub strength: Option<String>,
    pub unit: Option<String>,
    #[schema(value_type = Option<i64>)]
    pub unit_price: Option<Money>,
    pub reorder_level: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<NaiveDate>)]
    pub expiry_date: Option<Option<NaiveDate>>,
    pub active: Option<bool>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom: CustomValues,
}

#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MedicationQuery {
    /// Matches name and generic name.
    pub search: Option<String>,
    /// Only medications at or below their reorder level.
    pub low_stock: Option<bool>,
    pub active: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct StockAdjustment {
    pub delta: i64,
    pub reason: MovementReason,
    pub note: Option<String>,
}

fn check_price(price: Money) -> HmsResult<Money> {
    if price.is_negative() {
        return Err(HmsError::invalid("unit_price cannot be negative"));
    }
    Ok(price)
}

fn check_reorder_level(level: i64) -> HmsResult<i64> {
    if level < 0 {
        return Err(HmsError::invalid("reorder_level cannot be negative"));
    }
    Ok(level)
}

#[derive(Clone, Debug)]
pub struct InventoryService {
    store: Arc<dyn DocumentStore>,
    medications: Collection<Medication>,
    movements: Collection<StockMovement>,
}

impl InventoryService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            medications: Collection::new(store.clone()),
            movements: Collection::new(store.clone()),
            store,
        }
    }

    fn custom_fields(&self) -> CustomFieldService {
        CustomFieldService::new(self.store.clone())
    }

    pub async fn list(&self, query: MedicationQuery) -> HmsResult<Page<Medication>> {
        let mut q = Query::new();
        if let Some(search) = &query.search {
            q = q.search(&["name", "generic_name"], search);
        }
        if let Some(active) = query.active {
            q = q.where_eq("active", active);
        }
        let page = PageParams::new(query.limit, query.offset);

        if query.low_stock != Some(true) {
            return self.medications.list(&page.apply(q)).await;
        }

        // Comparing two fields of one document is beyond the store's filters.
        let low: Vec<_> = self
            .medications
            .all(q)
            .await?
            .into_iter()
            .filter(|m| m.data.is_low_stock())
            .collect();
        Ok(Page {
            total: low.len(),
            items: low
                .into_iter()
                .skip(page.offset())
                .take(page.limit())
                .collect(),
        })
    }

    pub async fn get(&self, id: &DocumentId) -> HmsResult<Stored<Medication>> {
        self.medications.require(id).await
    }

    pub async fn create(
        &self,
        input: NewMedication,
        actor_id: Option<DocumentId>,
    ) -> HmsResult<Stored<Medication>> {
        if input.stock_quantity < 0 {
            return Err(HmsError::invalid("stock_quantity cannot be negative"));
        }
        let mut custom = input.custom;
        self.custom_fields()
            .validate_values(CustomFieldEntity::Medication, &mut custom)
            .await?;

        let opening = input.stock_quantity;
        let medication = Medication {
            name: required_text("name", &input.name)?,
            generic_name: optional_text("generic_name", input.generic_name)?,
            form: input.form,
            strength: optional_text("strength", input.strength)?,
            unit: required_text("unit", &input.unit)?,
            unit_price: check_price(input.unit_price)?,
            stock_quantity: 0,
            reorder_level: check_reorder_level(input.reorder_level)?,
            expiry_date: input.expiry_date,
            active: input.active,
            custom,
        };

        let created = self.medications.create(medication).await?;
        tracing::info!("created medication {} ({})", created.id, created.data.name);
        if opening == 0 {
            return Ok(created);
        }

        let initial = self
            .adjust_stock(
                &created.id,
                StockAdjustment {
                    delta: opening,
                    reason: MovementReason::Initial,
                    note: None,
                },
                actor_id,
                None,
            )
            .await;
        if let Err(e) = initial {
            // A medication whose opening stock was lost must not stay behind.
            if let Err(cleanup) = self.medications.delete(&created.id).await {
                tracing::error!(
                    "failed to remove medication {} after its opening stock failed: {}",
                    created.id,
                    cleanup
                );
            }
            return Err(e);
        }
        self.medications.require(&created.id).await
    }

    pub async fn update(
        &self,
        id: &DocumentId,
        input: MedicationUpdate,
    ) -> HmsResult<Stored<Medication>> {
        self.medications.require(id).await?;

        let name = input
            .name
            .as_deref()
            .map(|v| required_text("name", v))
            .transpose()?;
        let unit = input
            .unit
            .as_deref()
            .map(|v| required_text("unit", v))
            .transpose()?;
        let generic_name = input
            .generic_name
            .map(|v| optional_text("generic_name", Some(v)))
            .transpose()?;
        let strength = input
            .strength
            .map(|v| optional_text("strength", Some(v)))
            .transpose()?;
        let unit_price = input.unit_price.map(check_price).transpose()?;
        let reorder_level = input.reorder_level.map(check_reorder_level).transpose()?;
        let custom = if input.custom.is_empty() {
            None
        } else {
            Some(
                self.custom_fields()
                    .prepare_merge(CustomFieldEntity::Medication, input.custom)
                    .await?,
            )
        };

        self.medications
            .modify(id, |m| {
                if let Some(v) = &name {
                    m.name = v.clone();
                }
                if let Some(v) = &generic_name {
                    m.generic_name = v.clone();
                }
                if let Some(v) = input.form {
                    m.form = v;
                }
                if let Some(v) = &strength {
                    m.strength = v.clone();
                }
                if let Some(v) = &unit {
                    m.unit = v.clone();
                }
                if let Some(v) = unit_price {
                    m.unit_price = v;
                }
                if let Some(v) = reorder_level {
                    m.reorder_level = v;
                }
                if let Some(v) = input.expiry_date {
                    m.expiry_date = v;
                }
                if let Some(v) = input.active {
                    m.active = v;
                }
                if let Some(merge) = &custom {
                    m.custom = merge.apply(&m.custom)?;
                }
                Ok(())
            })
            .await
    }

    /// Deletes a medication that has no stock left. Its movements stay as history.
    pub async fn delete(&self, id: &DocumentId) -> HmsResult<()> {
        let current = self.medications.require(id).await?;
        if current.data.stock_quantity > 0 {
            return Err(HmsError::Conflict(format!(
                "medication {id} still has {} {} in stock",
                current.data.stock_quantity, current.data.unit
            )));
        }
        self.medications.delete(id).await?;
        tracing::info!("deleted medication {}", id);
        Ok(())
    }

    /// Applies `adjustment` to the stock and records the movement.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a zero delta or a delta whose sign contradicts the reason
    /// - `InsufficientStock` if the result would be negative
    /// - `Conflict` if the medication kept changing underneath us
    ///
    /// If the movement cannot be recorded the quantity change is reverted.
    pub async fn adjust_stock(
        &self,
        id: &DocumentId,
        adjustment: StockAdjustment,
        actor_id: Option<DocumentId>,
        prescription_id: Option<DocumentId>,
    ) -> HmsResult<Stored<StockMovement>> {
        let StockAdjustment {
            delta,
            reason,
            note,
        } = adjustment;
        reason.check_sign(delta)?;
        let note = optional_text("note", note)?;

        let updated = self.apply_delta(id, delta).await?;
        let movement = StockMovement {
            medication_id: *id,
            delta,
            resulting_quantity: updated.data.stock_quantity,
            reason,
            note,
            actor_id,
            prescription_id,
        };

        match self.movements.create(movement).await {
            Ok(recorded) => {
                tracing::info!(
                    "stock of medication {} changed by {} ({}), now {}",
                    id,
                    delta,
                    reason,
                    recorded.data.resulting_quantity
                );
                Ok(recorded)
            }
            Err(e) => {
                if let Err(revert) = self.apply_delta(id, delta.saturating_neg()).await {
                    tracing::error!(
                        "failed to revert stock change of {} on medication {}: {}",
                        delta,
                        id,
                        revert
                    );
                }
                Err(e)
            }
        }
    }

    async fn apply_delta(&self, id: &DocumentId, delta: i64) -> HmsResult<Stored<Medication>> {
        self.medications
            .modify(id, |m| {
                let next = m
                    .stock_quantity
                    .checked_add(delta)
                    .ok_or(HmsError::Overflow("stock quantity"))?;
                if next < 0 {
                    return Err(HmsError::InsufficientStock {
                        medication: m.name.to_string(),
                        available: m.stock_quantity,
                        requested: delta.saturating_neg(),
                    });
                }
                m.stock_quantity = next;
                Ok(())
            })
            .await
    }

    pub async fn list_movements(
        &self,
        medication_id: &DocumentId,
        page: PageParams,
    ) -> HmsResult<Page<StockMovement>> {
        self.medications.require(medication_id).await?;
        let q = Query::new().where_eq("medication_id", medication_id.to_string());
        self.movements.list(&page.apply(q)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::custom_fields::{FieldType, NewCustomField};
    use crate::store::{DocumentPage, FileStore, MemoryStore, StoreError, StoreResult};
    use crate::store::Document;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn service() -> InventoryService {
        InventoryService::new(Arc::new(MemoryStore::new()))
    }

    fn amoxicillin(stock: i64) -> NewMedication {
        NewMedication {
            name: "Amoxicillin".into(),
            generic_name: Some("amoxicillin trihydrate".into()),
            form: DosageForm::Capsule,
            strength: Some("500 mg".into()),
            unit: "capsule".into(),
            unit_price: Money::from_minor(35),
            stock_quantity: stock,
            reorder_level: 20,
            expiry_date: None,
            active: true,
            custom: CustomValues::new(),
        }
    }

    fn adjustment(delta: i64, reason: MovementReason) -> StockAdjustment {
        StockAdjustment {
            delta,
            reason,
            note: None,
        }
    }

    #[test]
    fn reasons_parse_from_their_wire_names() {
        assert_eq!(
            "purchase".parse::<MovementReason>().unwrap(),
            MovementReason::Purchase
        );
        assert!("stolen".parse::<MovementReason>().is_err());
    }

    #[tokio::test]
    async fn opening_stock_is_recorded_as_a_movement() {
        let inventory = service();
        let med = inventory.create(amoxicillin(100), None).await.unwrap();
        assert_eq!(med.data.stock_quantity, 100);

        let movements = inventory
            .list_movements(&med.id, PageParams::default())
            .await
            .unwrap();
        assert_eq!(movements.total, 1);
        assert_eq!(movements.items[0].data.reason, MovementReason::Initial);
        assert_eq!(movements.items[0].data.resulting_quantity, 100);
    }

    #[tokio::test]
    async fn adjustments_never_go_negative() {
        let inventory = service();
        let med = inventory.create(amoxicillin(10), None).await.unwrap();
        let actor = DocumentId::new();

        let movement = inventory
            .adjust_stock(&med.id, adjustment(-4, MovementReason::Dispensed), Some(actor), None)
            .await
            .unwrap();
        assert_eq!(movement.data.resulting_quantity, 6);
        assert_eq!(movement.data.actor_id, Some(actor));

        let err = inventory
            .adjust_stock(&med.id, adjustment(-7, MovementReason::Dispensed), None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HmsError::InsufficientStock {
                available: 6,
                requested: 7,
                ..
            }
        ));
        assert_eq!(inventory.get(&med.id).await.unwrap().data.stock_quantity, 6);
    }

    #[tokio::test]
    async fn reasons_constrain_the_sign() {
        let inventory = service();
        let med = inventory.create(amoxicillin(10), None).await.unwrap();

        for (delta, reason) in [
            (5, MovementReason::Dispensed),
            (-5, MovementReason::Purchase),
            (0, MovementReason::Correction),
        ] {
            assert!(matches!(
                inventory
                    .adjust_stock(&med.id, adjustment(delta, reason), None, None)
                    .await,
                Err(HmsError::InvalidInput(_))
            ));
        }
        inventory
            .adjust_stock(&med.id, adjustment(-2, MovementReason::Correction), None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn extreme_deltas_leave_stock_untouched() {
        let inventory = service();
        let med = inventory.create(amoxicillin(5), None).await.unwrap();

        for reason in [MovementReason::Damaged, MovementReason::Correction] {
            let err = inventory
                .adjust_stock(&med.id, adjustment(i64::MIN, reason), None, None)
                .await
                .unwrap_err();
            assert!(matches!(err, HmsError::InvalidInput(_)));
        }
        let err = inventory
            .adjust_stock(&med.id, adjustment(i64::MAX, MovementReason::Purchase), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HmsError::Overflow(_)));

        assert_eq!(inventory.get(&med.id).await.unwrap().data.stock_quantity, 5);
        let movements = inventory
            .list_movements(&med.id, PageParams::default())
            .await
            .unwrap();
        assert_eq!(movements.total, 1);
    }

    #[tokio::test]
    async fn update_cannot_touch_stock() {
        let inventory = service();
        let med = inventory.create(amoxicillin(10), None).await.unwrap();

        let rejected = serde_json::from_value::<MedicationUpdate>(json!({"stock_quantity": 99}));
        assert!(rejected.is_err());

        let update: MedicationUpdate =
            serde_json::from_value(json!({"unit_price": 40, "expiry_date": "2031-01-31"})).unwrap();
        let updated = inventory.update(&med.id, update).await.unwrap();
        assert_eq!(updated.data.unit_price, Money::from_minor(40));
        assert_eq!(updated.data.stock_quantity, 10);
        assert!(updated.data.expiry_date.is_some());
    }

    #[tokio::test]
    async fn low_stock_listing_and_search() {
        let inventory = service();
        inventory.create(amoxicillin(100), None).await.unwrap();
        let low = inventory.create(amoxicillin(5), None).await.unwrap();
        let mut paracetamol = amoxicillin(0);
        paracetamol.name = "Paracetamol".into();
        paracetamol.generic_name = None;
        inventory.create(paracetamol, None).await.unwrap();

        let page = inventory
            .list(MedicationQuery {
                low_stock: Some(true),
                search: Some("amox".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, low.id);

        let all_low = inventory
            .list(MedicationQuery {
                low_stock: Some(true),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all_low.total, 2);
        assert_eq!(all_low.items.len(), 1);
    }

    #[tokio::test]
    async fn delete_requires_empty_stock() {
        let inventory = service();
        let med = inventory.create(amoxicillin(3), None).await.unwrap();
        assert!(matches!(
            inventory.delete(&med.id).await,
            Err(HmsError::Conflict(_))
        ));

        inventory
            .adjust_stock(&med.id, adjustment(-3, MovementReason::Expired), None, None)
            .await
            .unwrap();
        inventory.delete(&med.id).await.unwrap();
        assert!(matches!(
            inventory.get(&med.id).await,
            Err(HmsError::NotFound { .. })
        ));
    }

    /// Refuses to store movements so the revert path runs.
    #[derive(Debug)]
    struct NoMovements(MemoryStore);

    #[async_trait]
    impl DocumentStore for NoMovements {
        async fn get(&self, c: &str, id: &DocumentId) -> StoreResult<Option<Document>> {
            self.0.get(c, id).await
        }

        async fn list(&self, c: &str, q: &Query) -> StoreResult<DocumentPage> {
            self.0.list(c, q).await
        }

        async fn create(&self, c: &str, id: DocumentId, data: Value) -> StoreResult<Document> {
            if c == STOCK_MOVEMENTS {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.0.create(c, id, data).await
        }

        async fn replace(
            &self,
            c: &str,
            id: &DocumentId,
            expected: u64,
            data: Value,
        ) -> StoreResult<Document> {
            self.0.replace(c, id, expected, data).await
        }

        async fn delete(&self, c: &str, id: &DocumentId) -> StoreResult<bool> {
            self.0.delete(c, id).await
        }
    }

    #[tokio::test]
    async fn failed_ledger_write_reverts_the_quantity() {
        let inventory = InventoryService::new(Arc::new(NoMovements(MemoryStore::new())));
        let med = inventory.create(amoxicillin(0), None).await.unwrap();

        let err = inventory
            .adjust_stock(&med.id, adjustment(50, MovementReason::Purchase), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HmsError::Store(_)));
        assert_eq!(inventory.get(&med.id).await.unwrap().data.stock_quantity, 0);
    }

    #[tokio::test]
    async fn failed_opening_stock_leaves_no_medication() {
        let inventory = InventoryService::new(Arc::new(NoMovements(MemoryStore::new())));

        let err = inventory.create(amoxicillin(20), None).await.unwrap_err();
        assert!(matches!(err, HmsError::Store(_)));

        let page = inventory.list(MedicationQuery::default()).await.unwrap();
        assert_eq!(page.total, 0);
    }

    /// Lands a competing custom value edit just before the first medication write.
    #[derive(Debug, Default)]
    struct CompetingEdit {
        inner: MemoryStore,
        fired: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for CompetingEdit {
        async fn get(&self, c: &str, id: &DocumentId) -> StoreResult<Option<Document>> {
            self.inner.get(c, id).await
        }

        async fn list(&self, c: &str, q: &Query) -> StoreResult<DocumentPage> {
            self.inner.list(c, q).await
        }

        async fn create(&self, c: &str, id: DocumentId, data: Value) -> StoreResult<Document> {
            self.inner.create(c, id, data).await
        }

        async fn replace(
            &self,
            c: &str,
            id: &DocumentId,
            expected: u64,
            data: Value,
        ) -> StoreResult<Document> {
            if c == MEDICATIONS && !self.fired.swap(true, Ordering::SeqCst) {
                if let Some(current) = self.inner.get(c, id).await? {
                    let mut edited = current.data.clone();
                    edited["custom"]["supplier"] = json!("Acme");
                    self.inner.replace(c, id, current.revision, edited).await?;
                }
            }
            self.inner.replace(c, id, expected, data).await
        }

        async fn delete(&self, c: &str, id: &DocumentId) -> StoreResult<bool> {
            self.inner.delete(c, id).await
        }
    }

    #[tokio::test]
    async fn custom_values_merge_into_the_latest_revision() {
        let store: Arc<dyn DocumentStore> = Arc::new(CompetingEdit::default());
        let fields = CustomFieldService::new(store.clone());
        for key in ["ward", "supplier"] {
            fields
                .create(NewCustomField {
                    entity: CustomFieldEntity::Medication,
                    key: key.into(),
                    label: key.into(),
                    field_type: FieldType::Text,
                    required: false,
                    options: vec![],
                })
                .await
                .unwrap();
        }

        let inventory = InventoryService::new(store);
        let mut input = amoxicillin(0);
        input.custom = [("ward".to_string(), json!("A"))].into();
        let med = inventory.create(input, None).await.unwrap();

        let update: MedicationUpdate =
            serde_json::from_value(json!({"custom": {"ward": "B"}})).unwrap();
        let updated = inventory.update(&med.id, update).await.unwrap();

        let expected: CustomValues = [
            ("supplier".to_string(), json!("Acme")),
            ("ward".to_string(), json!("B")),
        ]
        .into();
        assert_eq!(updated.data.custom, expected);
    }

    async fn race_dispensing(store: Arc<dyn DocumentStore>) {
        let inventory = InventoryService::new(store);
        let med = inventory.create(amoxicillin(100), None).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..40 {
            let inventory = inventory.clone();
            let id = med.id;
            tasks.push(tokio::spawn(async move {
                inventory
                    .adjust_stock(&id, adjustment(-3, MovementReason::Dispensed), None, None)
                    .await
            }));
        }

        let mut succeeded = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(movement) => {
                    assert!(movement.data.resulting_quantity >= 0);
                    succeeded += 1;
                }
                Err(HmsError::InsufficientStock { .. } | HmsError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert!(succeeded >= 1);
        let stock = inventory.get(&med.id).await.unwrap().data.stock_quantity;
        assert_eq!(stock, 100 - 3 * succeeded);
        assert!(stock >= 0);
        let movements = inventory
            .list_movements(&med.id, PageParams::default())
            .await
            .unwrap();
        assert_eq!(movements.total as i64, succeeded + 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispensing_keeps_the_ledger_whole_in_memory() {
        race_dispensing(Arc::new(MemoryStore::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispensing_keeps_the_ledger_whole_on_disk() {
        let temp = TempDir::new().unwrap();
        race_dispensing(Arc::new(FileStore::open(temp.path()).unwrap())).await;
    }
}
