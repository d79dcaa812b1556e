//! Invoices and payments.
//!
//! An invoice's `balance` is what is still owed. It starts equal to `amount` and only
//! payments reduce it, so `0 <= balance <= amount` holds at every stored revision. The paid
//! states are derived from the balance and cannot be set directly.
//!
//! Recording a payment touches two documents. The invoice is updated first, under
//! optimistic concurrency, because it carries the invariant; the payment document follows,
//! and if it cannot be written the invoice change is reverted.

use super::nullable;
use super::patients::PatientService;
use crate::constants::{INVOICES, PAYMENTS};
use crate::store::{Collection, DocumentStore, Entity, Order, Page, PageParams, Query, Stored};
use crate::validation::{optional_text, required_text};
use crate::{HmsError, HmsResult};
use chrono::{DateTime, NaiveDate, Utc};
use hms_types::{Money, NonEmptyText};
use hms_uuid::DocumentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

// ============================================================================
// ENTITIES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn accepts_payments(&self) -> bool {
        matches!(self, InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvoiceItem {
    #[schema(value_type = String)]
    pub description: NonEmptyText,
    pub quantity: u32,
    #[schema(value_type = i64)]
    pub unit_price: Money,
    #[schema(value_type = i64)]
    pub total: Money,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Invoice {
    pub number: String,
    #[schema(value_type = String)]
    pub patient_id: DocumentId,
    #[schema(value_type = Option<String>)]
    pub prescription_id: Option<DocumentId>,
    pub items: Vec<InvoiceItem>,
    #[schema(value_type = i64)]
    pub amount: Money,
    #[schema(value_type = i64)]
    pub balance: Money,
    pub status: InvoiceStatus,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Entity for Invoice {
    const COLLECTION: &'static str = INVOICES;
    const NAME: &'static str = "invoice";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Insurance,
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    #[schema(value_type = String)]
    pub invoice_id: DocumentId,
    #[schema(value_type = String)]
    pub patient_id: DocumentId,
    #[schema(value_type = i64)]
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    #[schema(value_type = String)]
    pub received_by: DocumentId,
    pub paid_at: DateTime<Utc>,
}

impl Entity for Payment {
    const COLLECTION: &'static str = PAYMENTS;
    const NAME: &'static str = "payment";
}

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewInvoiceItem {
    pub description: String,
    pub quantity: u32,
    #[schema(value_type = i64)]
    pub unit_price: Money,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewInvoice {
    #[schema(value_type = String)]
    pub patient_id: DocumentId,
    pub items: Vec<NewInvoiceItem>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct InvoiceUpdate {
    /// Replaces all items; amount and balance are recomputed.
    pub items: Option<Vec<NewInvoiceItem>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<NaiveDate>)]
    pub due_date: Option<Option<NaiveDate>>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct InvoiceQuery {
    #[param(value_type = Option<String>)]
    pub patient_id: Option<DocumentId>,
    #[param(value_type = Option<String>)]
    pub status: Option<InvoiceStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewPayment {
    #[schema(value_type = i64)]
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
}

// ============================================================================
// PURE RULES
// ============================================================================

/// `INV-<YYYYMMDD>-<short code of the id>`
pub fn invoice_number(id: &DocumentId, at: DateTime<Utc>) -> String {
    format!("INV-{}-{}", at.format("%Y%m%d"), id.short_code())
}

/// Validates the lines and returns them priced, together with their sum.
pub fn price_items(items: Vec<NewInvoiceItem>) -> HmsResult<(Vec<InvoiceItem>, Money)> {
    if items.is_empty() {
        return Err(HmsError::invalid("an invoice needs at least one item"));
    }

    let mut amount = Money::ZERO;
    let mut priced = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity == 0 {
            return Err(HmsError::invalid("item quantity must be positive"));
        }
        if item.unit_price.is_negative() {
            return Err(HmsError::invalid("item unit_price cannot be negative"));
        }
        let total = item
            .unit_price
            .checked_mul(item.quantity)
            .ok_or(HmsError::Overflow("invoice item total"))?;
        amount = amount
            .checked_add(total)
            .ok_or(HmsError::Overflow("invoice amount"))?;
        priced.push(InvoiceItem {
            description: required_text("description", &item.description)?,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total,
        });
    }
    Ok((priced, amount))
}

/// The status an issued invoice has with the given balance.
fn settled_status(amount: Money, balance: Money) -> InvoiceStatus {
    if balance == Money::ZERO {
        InvoiceStatus::Paid
    } else if balance < amount {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Issued
    }
}

/// Deducts a payment from the invoice.
pub fn apply_payment(invoice: &mut Invoice, amount: Money, at: DateTime<Utc>) -> HmsResult<()> {
    if !invoice.status.accepts_payments() {
        return Err(HmsError::Conflict(format!(
            "invoice {} is {} and does not accept payments",
            invoice.number, invoice.status
        )));
    }
    if !amount.is_positive() {
        return Err(HmsError::invalid("payment amount must be positive"));
    }
    if amount > invoice.balance {
        return Err(HmsError::invalid(format!(
            "payment of {} exceeds the outstanding balance of {}",
            amount, invoice.balance
        )));
    }

    invoice.balance = invoice
        .balance
        .checked_sub(amount)
        .ok_or(HmsError::Overflow("invoice balance"))?;
    invoice.status = settled_status(invoice.amount, invoice.balance);
    if invoice.status == InvoiceStatus::Paid {
        invoice.paid_at = Some(at);
    }
    Ok(())
}

/// Undoes [`apply_payment`].
pub fn revert_payment(invoice: &mut Invoice, amount: Money) -> HmsResult<()> {
    let balance = invoice
        .balance
        .checked_add(amount)
        .ok_or(HmsError::Overflow("invoice balance"))?;
    if balance > invoice.amount {
        return Err(HmsError::Conflict(format!(
            "reverting {} would exceed the amount of invoice {}",
            amount, invoice.number
        )));
    }
    invoice.balance = balance;
    invoice.status = settled_status(invoice.amount, invoice.balance);
    invoice.paid_at = None;
    Ok(())
}

// ============================================================================
// BILLING SERVICE
// ============================================================================

#[derive(Clone, Debug)]
pub struct BillingService {
    store: Arc<dyn DocumentStore>,
    invoices: Collection<Invoice>,
    payments: Collection<Payment>,
}

impl BillingService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            invoices: Collection::new(store.clone()),
            payments: Collection::new(store.clone()),
            store,
        }
    }

    pub async fn list(&self, query: InvoiceQuery) -> HmsResult<Page<Invoice>> {
        let mut q = Query::new();
        if let Some(patient_id) = query.patient_id {
            q = q.where_eq("patient_id", patient_id.to_string());
        }
        if let Some(status) = query.status {
            q = q.where_eq("status", status.as_str());
        }
        let page = PageParams::new(query.limit, query.offset);
        self.invoices.list(&page.apply(q)).await
    }

    pub async fn get(&self, id: &DocumentId) -> HmsResult<Stored<Invoice>> {
        self.invoices.require(id).await
    }

    /// Creates a draft invoice.
    pub async fn create(&self, input: NewInvoice) -> HmsResult<Stored<Invoice>> {
        PatientService::ensure_patient(&self.store, &input.patient_id).await?;
        let (items, amount) = price_items(input.items)?;

        let id = DocumentId::new();
        let invoice = Invoice {
            number: invoice_number(&id, Utc::now()),
            patient_id: input.patient_id,
            prescription_id: None,
            items,
            amount,
            balance: amount,
            status: InvoiceStatus::Draft,
            due_date: input.due_date,
            notes: optional_text("notes", input.notes)?,
            issued_at: None,
            paid_at: None,
        };
        let created = self.invoices.create_with_id(id, invoice).await?;
        tracing::info!("created invoice {} ({})", created.data.number, created.id);
        Ok(created)
    }

    /// Creates an already issued invoice at a caller-chosen id. A second call with the
    /// same id fails with `AlreadyExists`.
    pub(crate) async fn create_issued_with_id(
        &self,
        id: DocumentId,
        patient_id: DocumentId,
        prescription_id: Option<DocumentId>,
        items: Vec<NewInvoiceItem>,
    ) -> HmsResult<Stored<Invoice>> {
        let (items, amount) = price_items(items)?;
        let now = Utc::now();
        let invoice = Invoice {
            number: invoice_number(&id, now),
            patient_id,
            prescription_id,
            items,
            amount,
            balance: amount,
            status: settled_status(amount, amount),
            due_date: None,
            notes: None,
            issued_at: Some(now),
            paid_at: (amount == Money::ZERO).then_some(now),
        };
        self.invoices.create_with_id(id, invoice).await
    }

    pub async fn update(&self, id: &DocumentId, input: InvoiceUpdate) -> HmsResult<Stored<Invoice>> {
        let priced = input.items.map(price_items).transpose()?;
        let notes = input
            .notes
            .map(|n| optional_text("notes", Some(n)))
            .transpose()?;

        self.invoices
            .modify(id, |invoice| {
                if invoice.status != InvoiceStatus::Draft {
                    return Err(HmsError::Conflict(format!(
                        "invoice {} is {} and can no longer be edited",
                        invoice.number, invoice.status
                    )));
                }
                if let Some((items, amount)) = &priced {
                    invoice.items = items.clone();
                    invoice.amount = *amount;
                    invoice.balance = *amount;
                }
                if let Some(due_date) = input.due_date {
                    invoice.due_date = due_date;
                }
                if let Some(notes) = &notes {
                    invoice.notes = notes.clone();
                }
                Ok(())
            })
            .await
    }

    /// Issues or cancels an invoice. The paid states follow from payments.
    pub async fn set_status(
        &self,
        id: &DocumentId,
        status: InvoiceStatus,
    ) -> HmsResult<Stored<Invoice>> {
        if !matches!(status, InvoiceStatus::Issued | InvoiceStatus::Cancelled) {
            return Err(HmsError::invalid(format!(
                "status {status} cannot be set directly"
            )));
        }
        if status == InvoiceStatus::Cancelled && self.has_payments(id).await? {
            return Err(HmsError::Conflict(format!(
                "invoice {id} has payments and cannot be cancelled"
            )));
        }

        let now = Utc::now();
        let updated = self
            .invoices
            .modify(id, |invoice| {
                let allowed = match status {
                    InvoiceStatus::Issued => invoice.status == InvoiceStatus::Draft,
                    _ => matches!(invoice.status, InvoiceStatus::Draft | InvoiceStatus::Issued),
                };
                if !allowed {
                    return Err(HmsError::InvalidTransition {
                        entity: Invoice::NAME,
                        from: invoice.status.to_string(),
                        to: status.to_string(),
                    });
                }
                if status == InvoiceStatus::Issued {
                    invoice.issued_at = Some(now);
                    invoice.status = settled_status(invoice.amount, invoice.balance);
                    if invoice.status == InvoiceStatus::Paid {
                        invoice.paid_at = Some(now);
                    }
                } else {
                    invoice.status = status;
                }
                Ok(())
            })
            .await?;
        tracing::info!("invoice {} is now {}", updated.data.number, updated.data.status);
        Ok(updated)
    }

    pub async fn delete(&self, id: &DocumentId) -> HmsResult<()> {
        let invoice = self.invoices.require(id).await?;
        if !matches!(
            invoice.data.status,
            InvoiceStatus::Draft | InvoiceStatus::Cancelled
        ) {
            return Err(HmsError::Conflict(format!(
                "invoice {} is {} and cannot be deleted",
                invoice.data.number, invoice.data.status
            )));
        }
        self.invoices.delete(id).await?;
        Ok(())
    }

    async fn has_payments(&self, invoice_id: &DocumentId) -> HmsResult<bool> {
        self.payments
            .exists(Query::new().where_eq("invoice_id", invoice_id.to_string()))
            .await
    }

    /// Records a payment against an issued invoice.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the amount is not positive or exceeds the balance
    /// - `Conflict` if the invoice does not accept payments, or kept changing underneath us
    pub async fn record_payment(
        &self,
        invoice_id: &DocumentId,
        input: NewPayment,
        received_by: DocumentId,
    ) -> HmsResult<Stored<Payment>> {
        let reference = optional_text("reference", input.reference)?;
        let now = Utc::now();
        let amount = input.amount;

        let invoice = self
            .invoices
            .modify(invoice_id, |invoice| apply_payment(invoice, amount, now))
            .await?;

        let payment = Payment {
            invoice_id: *invoice_id,
            patient_id: invoice.data.patient_id,
            amount,
            method: input.method,
            reference,
            received_by,
            paid_at: now,
        };
        match self.payments.create(payment).await {
            Ok(recorded) => {
                tracing::info!(
                    "recorded payment of {} on invoice {}, balance now {}",
                    amount,
                    invoice.data.number,
                    invoice.data.balance
                );
                Ok(recorded)
            }
            Err(e) => {
                let reverted = self
                    .invoices
                    .modify(invoice_id, |invoice| revert_payment(invoice, amount))
                    .await;
                if let Err(revert) = reverted {
                    tracing::error!(
                        "failed to revert payment of {} on invoice {}: {}",
                        amount,
                        invoice_id,
                        revert
                    );
                }
                Err(e)
            }
        }
    }

    pub async fn list_payments(&self, invoice_id: &DocumentId) -> HmsResult<Vec<Stored<Payment>>> {
        self.invoices.require(invoice_id).await?;
        self.payments
            .all(
                Query::new()
                    .where_eq("invoice_id", invoice_id.to_string())
                    .order(Order::CreatedAsc),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::patients::NewPatient;
    use crate::store::{FileStore, MemoryStore};
    use crate::test_support::{test_hms, test_hms_on};
    use crate::Hms;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn item(description: &str, quantity: u32, unit_price: i64) -> NewInvoiceItem {
        NewInvoiceItem {
            description: description.into(),
            quantity,
            unit_price: Money::from_minor(unit_price),
        }
    }

    fn issued(amount: i64) -> Invoice {
        Invoice {
            number: "INV-TEST".into(),
            patient_id: DocumentId::new(),
            prescription_id: None,
            items: vec![],
            amount: Money::from_minor(amount),
            balance: Money::from_minor(amount),
            status: InvoiceStatus::Issued,
            due_date: None,
            notes: None,
            issued_at: Some(Utc::now()),
            paid_at: None,
        }
    }

    async fn setup() -> (TempDir, Hms, DocumentId) {
        let temp = TempDir::new().unwrap();
        let hms = test_hms(&temp.path().join("objects"));
        let patient = hms
            .patients()
            .create(NewPatient {
                first_name: "Florence".into(),
                last_name: "Nightingale".into(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id;
        (temp, hms, patient)
    }

    #[test]
    fn numbers_use_date_and_short_code() {
        let id = DocumentId::parse("a1b2c3d4e5f60718293a4b5c6d7e8f90").unwrap();
        let at = Utc.with_ymd_and_hms(2030, 7, 1, 12, 0, 0).unwrap();
        assert_eq!(invoice_number(&id, at), "INV-20300701-A1B2C3D4");
    }

    #[test]
    fn items_are_priced_and_summed() {
        let (items, amount) =
            price_items(vec![item("Consultation", 1, 5000), item("Bandage", 3, 250)]).unwrap();
        assert_eq!(items[1].total, Money::from_minor(750));
        assert_eq!(amount, Money::from_minor(5750));

        assert!(price_items(vec![]).is_err());
        assert!(price_items(vec![item("Free", 0, 100)]).is_err());
        assert!(price_items(vec![item("Refund", 1, -100)]).is_err());
        assert!(price_items(vec![item(" ", 1, 100)]).is_err());
        assert!(matches!(
            price_items(vec![item("Huge", u32::MAX, i64::MAX)]),
            Err(HmsError::Overflow(_))
        ));
    }

    #[test]
    fn payments_move_through_the_paid_states() {
        let mut invoice = issued(1000);
        apply_payment(&mut invoice, Money::from_minor(400), Utc::now()).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(invoice.balance, Money::from_minor(600));

        assert!(matches!(
            apply_payment(&mut invoice, Money::from_minor(601), Utc::now()),
            Err(HmsError::InvalidInput(_))
        ));
        assert!(apply_payment(&mut invoice, Money::ZERO, Utc::now()).is_err());

        apply_payment(&mut invoice, Money::from_minor(600), Utc::now()).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert!(invoice.paid_at.is_some());
        assert!(matches!(
            apply_payment(&mut invoice, Money::from_minor(1), Utc::now()),
            Err(HmsError::Conflict(_))
        ));

        revert_payment(&mut invoice, Money::from_minor(600)).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(invoice.paid_at, None);
        assert!(revert_payment(&mut invoice, Money::from_minor(401)).is_err());
    }

    #[tokio::test]
    async fn draft_invoices_are_editable_until_issued() {
        let (_temp, hms, patient) = setup().await;
        let billing = hms.billing();
        let invoice = billing
            .create(NewInvoice {
                patient_id: patient,
                items: vec![item("Consultation", 1, 5000)],
                due_date: None,
                notes: None,
            })
            .await
            .unwrap();
        assert_eq!(invoice.data.status, InvoiceStatus::Draft);
        assert!(invoice.data.number.starts_with("INV-"));

        let updated = billing
            .update(
                &invoice.id,
                InvoiceUpdate {
                    items: Some(vec![item("Consultation", 2, 5000)]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.data.amount, Money::from_minor(10_000));
        assert_eq!(updated.data.balance, Money::from_minor(10_000));

        let issued = billing
            .set_status(&invoice.id, InvoiceStatus::Issued)
            .await
            .unwrap();
        assert!(issued.data.issued_at.is_some());
        assert!(matches!(
            billing.update(&invoice.id, InvoiceUpdate::default()).await,
            Err(HmsError::Conflict(_))
        ));
        assert!(matches!(
            billing.set_status(&invoice.id, InvoiceStatus::Paid).await,
            Err(HmsError::InvalidInput(_))
        ));
        assert!(matches!(
            billing.delete(&invoice.id).await,
            Err(HmsError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn unknown_patient_is_rejected() {
        let (_temp, hms, _) = setup().await;
        let result = hms
            .billing()
            .create(NewInvoice {
                patient_id: DocumentId::new(),
                items: vec![item("Consultation", 1, 5000)],
                due_date: None,
                notes: None,
            })
            .await;
        assert!(matches!(result, Err(HmsError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn payments_settle_the_invoice_and_block_cancellation() {
        let (_temp, hms, patient) = setup().await;
        let billing = hms.billing();
        let invoice = billing
            .create(NewInvoice {
                patient_id: patient,
                items: vec![item("Ward day", 2, 12_000)],
                due_date: None,
                notes: None,
            })
            .await
            .unwrap();
        let cashier = DocumentId::new();

        let early = billing
            .record_payment(
                &invoice.id,
                NewPayment {
                    amount: Money::from_minor(100),
                    method: PaymentMethod::Cash,
                    reference: None,
                },
                cashier,
            )
            .await;
        assert!(matches!(early, Err(HmsError::Conflict(_))));

        billing
            .set_status(&invoice.id, InvoiceStatus::Issued)
            .await
            .unwrap();
        let payment = billing
            .record_payment(
                &invoice.id,
                NewPayment {
                    amount: Money::from_minor(20_000),
                    method: PaymentMethod::Card,
                    reference: Some("AUTH-123".into()),
                },
                cashier,
            )
            .await
            .unwrap();
        assert_eq!(payment.data.patient_id, patient);

        let current = billing.get(&invoice.id).await.unwrap();
        assert_eq!(current.data.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(current.data.balance, Money::from_minor(4_000));

        assert!(matches!(
            billing.set_status(&invoice.id, InvoiceStatus::Cancelled).await,
            Err(HmsError::Conflict(_))
        ));

        billing
            .record_payment(
                &invoice.id,
                NewPayment {
                    amount: Money::from_minor(4_000),
                    method: PaymentMethod::Insurance,
                    reference: None,
                },
                cashier,
            )
            .await
            .unwrap();
        let paid = billing.get(&invoice.id).await.unwrap();
        assert_eq!(paid.data.status, InvoiceStatus::Paid);
        assert_eq!(paid.data.balance, Money::ZERO);
        assert_eq!(billing.list_payments(&invoice.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_drafts_can_be_deleted() {
        let (_temp, hms, patient) = setup().await;
        let billing = hms.billing();
        let invoice = billing
            .create(NewInvoice {
                patient_id: patient,
                items: vec![item("X-ray", 1, 9_000)],
                due_date: None,
                notes: None,
            })
            .await
            .unwrap();
        billing
            .set_status(&invoice.id, InvoiceStatus::Cancelled)
            .await
            .unwrap();
        assert!(matches!(
            billing.set_status(&invoice.id, InvoiceStatus::Issued).await,
            Err(HmsError::InvalidTransition { .. })
        ));
        billing.delete(&invoice.id).await.unwrap();
        assert!(billing.get(&invoice.id).await.is_err());
    }

    async fn race_payments(hms: Hms) {
        let patient = hms
            .patients()
            .create(NewPatient {
                first_name: "Mary".into(),
                last_name: "Seacole".into(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id;
        let billing = hms.billing();
        let invoice = billing
            .create(NewInvoice {
                patient_id: patient,
                items: vec![item("Surgery", 1, 10_000)],
                due_date: None,
                notes: None,
            })
            .await
            .unwrap();
        billing
            .set_status(&invoice.id, InvoiceStatus::Issued)
            .await
            .unwrap();

        let cashier = DocumentId::new();
        let mut tasks = Vec::new();
        for _ in 0..30 {
            let billing = billing.clone();
            let id = invoice.id;
            tasks.push(tokio::spawn(async move {
                billing
                    .record_payment(
                        &id,
                        NewPayment {
                            amount: Money::from_minor(500),
                            method: PaymentMethod::Card,
                            reference: None,
                        },
                        cashier,
                    )
                    .await
            }));
        }

        let mut succeeded = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(HmsError::InvalidInput(_) | HmsError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert!(succeeded >= 1);
        let settled = billing.get(&invoice.id).await.unwrap().data;
        assert_eq!(settled.balance, Money::from_minor(10_000 - 500 * succeeded));
        assert!(settled.balance >= Money::ZERO);
        assert!(settled.balance <= settled.amount);
        let payments = billing.list_payments(&invoice.id).await.unwrap();
        assert_eq!(payments.len() as i64, succeeded);
        if settled.balance == Money::ZERO {
            assert_eq!(settled.status, InvoiceStatus::Paid);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_payments_never_overdraw_in_memory() {
        let temp = TempDir::new().unwrap();
        race_payments(test_hms_on(
            &temp.path().join("objects"),
            Arc::new(MemoryStore::new()),
        ))
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_payments_never_overdraw_on_disk() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(&temp.path().join("store")).unwrap();
        race_payments(test_hms_on(&temp.path().join("objects"), Arc::new(store))).await;
    }
}
