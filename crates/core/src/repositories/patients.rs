//! Patient records and their attachments.
//!
//! ## Pure Data Operations
//!
//! Demographics live in the `patients` collection. Attachments are split in two: the bytes
//! go to owner-scoped object storage ([`hms_files::FilesService`], one area per patient)
//! and a `patient_files` document records the metadata needed to list and serve them.

use super::custom_fields::{CustomFieldEntity, CustomFieldService, CustomValues};
use super::nullable;
use crate::constants::{INVOICES, PATIENTS, PATIENT_FILES};
use crate::store::{Collection, DocumentStore, Entity, Order, Page, PageParams, Query, Stored};
use crate::validation::{optional_text, required_text, validate_phone};
use crate::{blocking, CoreConfig, HmsError, HmsResult};
use chrono::{DateTime, NaiveDate, Utc};
use hms_files::{FileMetadata, FilesError, FilesService};
use hms_types::{EmailAddress, NonEmptyText};
use hms_uuid::{DocumentId, Sha256Hash};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

// ============================================================================
// ENTITIES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
    Other,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum BloodGroup {
    #[serde(rename = "A+")]
    APositive,
    #[serde(rename = "A-")]
    ANegative,
    #[serde(rename = "B+")]
    BPositive,
    #[serde(rename = "B-")]
    BNegative,
    #[serde(rename = "AB+")]
    AbPositive,
    #[serde(rename = "AB-")]
    AbNegative,
    #[serde(rename = "O+")]
    OPositive,
    #[serde(rename = "O-")]
    ONegative,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EmergencyContact {
    pub name: String,
    pub relationship: Option<String>,
    pub phone: String,
}

impl EmergencyContact {
    fn validated(self) -> HmsResult<Self> {
        let name = required_text("emergency_contact.name", &self.name)?.into_inner();
        let phone = required_text("emergency_contact.phone", &self.phone)?.into_inner();
        validate_phone(&phone)?;
        Ok(Self {
            name,
            relationship: optional_text("emergency_contact.relationship", self.relationship)?,
            phone,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Patient {
    #[schema(value_type = String)]
    pub first_name: NonEmptyText,
    #[schema(value_type = String)]
    pub last_name: NonEmptyText,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub phone: Option<String>,
    #[schema(value_type = Option<String>)]
    pub email: Option<EmailAddress>,
    pub address: Option<String>,
    pub national_id: Option<String>,
    pub blood_group: Option<BloodGroup>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub emergency_contact: Option<EmergencyContact>,
    pub notes: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom: CustomValues,
}

impl Entity for Patient {
    const COLLECTION: &'static str = PATIENTS;
    const NAME: &'static str = "patient";
}

/// Metadata of one attachment. The bytes live in object storage under `hash`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PatientFile {
    #[schema(value_type = String)]
    pub patient_id: DocumentId,
    pub filename: String,
    pub media_type: String,
    pub size_bytes: u64,
    #[schema(value_type = String)]
    pub hash: Sha256Hash,
    pub stored_at: DateTime<Utc>,
    #[schema(value_type = String)]
    pub uploaded_by: DocumentId,
}

impl Entity for PatientFile {
    const COLLECTION: &'static str = PATIENT_FILES;
    const NAME: &'static str = "patient file";
}

impl PatientFile {
    fn from_metadata(patient_id: DocumentId, uploaded_by: DocumentId, meta: FileMetadata) -> Self {
        Self {
            patient_id,
            filename: meta.original_filename.into_inner(),
            media_type: meta
                .media_type
                .map(NonEmptyText::into_inner)
                .unwrap_or_else(|| FALLBACK_MEDIA_TYPE.to_string()),
            size_bytes: meta.size_bytes,
            hash: meta.hash,
            stored_at: meta.stored_at,
            uploaded_by,
        }
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub national_id: Option<String>,
    pub blood_group: Option<BloodGroup>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub emergency_contact: Option<EmergencyContact>,
    pub notes: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom: CustomValues,
}

/// Partial update. Absent fields are left unchanged; `""` clears optional text and `null`
/// clears the structured fields.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct PatientUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<NaiveDate>)]
    pub date_of_birth: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<Gender>)]
    pub gender: Option<Option<Gender>>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub national_id: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<BloodGroup>)]
    pub blood_group: Option<Option<BloodGroup>>,
    pub allergies: Option<Vec<String>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<EmergencyContact>)]
    pub emergency_contact: Option<Option<EmergencyContact>>,
    pub notes: Option<String>,
    /// Merged into the existing values; `null` removes a key.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom: CustomValues,
}

#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PatientQuery {
    /// Matches names, phone, e-mail and national id.
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn validate_dob(dob: Option<NaiveDate>) -> HmsResult<Option<NaiveDate>> {
    if let Some(dob) = dob {
        if dob > Utc::now().date_naive() {
            return Err(HmsError::invalid("date_of_birth cannot be in the future"));
        }
    }
    Ok(dob)
}

fn clean_phone(phone: Option<String>) -> HmsResult<Option<String>> {
    let phone = optional_text("phone", phone)?;
    if let Some(p) = &phone {
        validate_phone(p)?;
    }
    Ok(phone)
}

fn clean_email(email: Option<String>) -> HmsResult<Option<EmailAddress>> {
    Ok(optional_text("email", email)?
        .map(EmailAddress::parse)
        .transpose()?)
}

fn clean_allergies(allergies: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = allergies
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    cleaned.sort();
    cleaned.dedup();
    cleaned
}

// ============================================================================
// PATIENT SERVICE
// ============================================================================

#[derive(Clone, Debug)]
pub struct PatientService {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn DocumentStore>,
    patients: Collection<Patient>,
    files: Collection<PatientFile>,
}

impl PatientService {
    pub fn new(cfg: Arc<CoreConfig>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            cfg,
            patients: Collection::new(store.clone()),
            files: Collection::new(store.clone()),
            store,
        }
    }

    fn custom_fields(&self) -> CustomFieldService {
        CustomFieldService::new(self.store.clone())
    }

    pub async fn list(&self, query: PatientQuery) -> HmsResult<Page<Patient>> {
        let mut q = Query::new();
        if let Some(search) = &query.search {
            q = q.search(
                &["first_name", "last_name", "phone", "email", "national_id"],
                search,
            );
        }
        let page = PageParams::new(query.limit, query.offset);
        self.patients.list(&page.apply(q)).await
    }

    pub async fn get(&self, id: &DocumentId) -> HmsResult<Stored<Patient>> {
        self.patients.require(id).await
    }

    /// Fails with `InvalidInput` if `id` is not a patient; used by other services to
    /// validate references.
    pub(crate) async fn ensure_patient(
        store: &Arc<dyn DocumentStore>,
        id: &DocumentId,
    ) -> HmsResult<()> {
        match Collection::<Patient>::new(store.clone()).get(id).await? {
            Some(_) => Ok(()),
            None => Err(HmsError::invalid(format!("unknown patient: {id}"))),
        }
    }

    pub async fn create(&self, input: NewPatient) -> HmsResult<Stored<Patient>> {
        let mut custom = input.custom;
        self.custom_fields()
            .validate_values(CustomFieldEntity::Patient, &mut custom)
            .await?;

        let patient = Patient {
            first_name: required_text("first_name", &input.first_name)?,
            last_name: required_text("last_name", &input.last_name)?,
            date_of_birth: validate_dob(input.date_of_birth)?,
            gender: input.gender,
            phone: clean_phone(input.phone)?,
            email: clean_email(input.email)?,
            address: optional_text("address", input.address)?,
            national_id: optional_text("national_id", input.national_id)?,
            blood_group: input.blood_group,
            allergies: clean_allergies(input.allergies),
            emergency_contact: input
                .emergency_contact
                .map(EmergencyContact::validated)
                .transpose()?,
            notes: optional_text("notes", input.notes)?,
            custom,
        };

        let created = self.patients.create(patient).await?;
        tracing::info!("created patient {}", created.id);
        Ok(created)
    }

    pub async fn update(&self, id: &DocumentId, input: PatientUpdate) -> HmsResult<Stored<Patient>> {
        self.patients.require(id).await?;

        let first_name = input
            .first_name
            .as_deref()
            .map(|v| required_text("first_name", v))
            .transpose()?;
        let last_name = input
            .last_name
            .as_deref()
            .map(|v| required_text("last_name", v))
            .transpose()?;
        let date_of_birth = input.date_of_birth.map(validate_dob).transpose()?;
        let phone = input.phone.map(|p| clean_phone(Some(p))).transpose()?;
        let email = input.email.map(|e| clean_email(Some(e))).transpose()?;
        let address = input
            .address
            .map(|a| optional_text("address", Some(a)))
            .transpose()?;
        let national_id = input
            .national_id
            .map(|n| optional_text("national_id", Some(n)))
            .transpose()?;
        let notes = input
            .notes
            .map(|n| optional_text("notes", Some(n)))
            .transpose()?;
        let emergency_contact = input
            .emergency_contact
            .map(|c| c.map(EmergencyContact::validated).transpose())
            .transpose()?;
        let allergies = input.allergies.map(clean_allergies);
        let custom = if input.custom.is_empty() {
            None
        } else {
            Some(
                self.custom_fields()
                    .prepare_merge(CustomFieldEntity::Patient, input.custom)
                    .await?,
            )
        };

        self.patients
            .modify(id, |p| {
                if let Some(v) = &first_name {
                    p.first_name = v.clone();
                }
                if let Some(v) = &last_name {
                    p.last_name = v.clone();
                }
                if let Some(v) = date_of_birth {
                    p.date_of_birth = v;
                }
                if let Some(v) = input.gender {
                    p.gender = v;
                }
                if let Some(v) = &phone {
                    p.phone = v.clone();
                }
                if let Some(v) = &email {
                    p.email = v.clone();
                }
                if let Some(v) = &address {
                    p.address = v.clone();
                }
                if let Some(v) = &national_id {
                    p.national_id = v.clone();
                }
                if let Some(v) = input.blood_group {
                    p.blood_group = v;
                }
                if let Some(v) = &allergies {
                    p.allergies = v.clone();
                }
                if let Some(v) = &emergency_contact {
                    p.emergency_contact = v.clone();
                }
                if let Some(v) = &notes {
                    p.notes = v.clone();
                }
                if let Some(merge) = &custom {
                    p.custom = merge.apply(&p.custom)?;
                }
                Ok(())
            })
            .await
    }

    /// Deletes a patient together with their attachments.
    ///
    /// Patients with invoices are kept: billing history must stay resolvable.
    pub async fn delete(&self, id: &DocumentId) -> HmsResult<()> {
        self.patients.require(id).await?;

        let has_invoices = self
            .store
            .list(INVOICES, &Query::new().where_eq("patient_id", id.to_string()).limit(1))
            .await?
            .total
            > 0;
        if has_invoices {
            return Err(HmsError::Conflict(format!(
                "patient {id} has invoices and cannot be deleted"
            )));
        }

        for file in self.attachment_docs(id).await? {
            self.files.delete(&file.id).await?;
        }
        self.with_objects(*id, |objects| objects.remove_all()).await?;

        self.patients.delete(id).await?;
        tracing::info!("deleted patient {}", id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------------

    /// Runs `work` against the patient's object storage on the blocking pool.
    async fn with_objects<T, F>(&self, patient_id: DocumentId, work: F) -> HmsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&FilesService) -> Result<T, FilesError> + Send + 'static,
    {
        let root: PathBuf = self.cfg.files_dir().to_path_buf();
        blocking(move || {
            std::fs::create_dir_all(&root).map_err(FilesError::from)?;
            let objects = FilesService::new(&root, patient_id)?;
            Ok(work(&objects)?)
        })
        .await
    }

    async fn attachment_docs(&self, patient_id: &DocumentId) -> HmsResult<Vec<Stored<PatientFile>>> {
        self.files
            .all(
                Query::new()
                    .where_eq("patient_id", patient_id.to_string())
                    .order(Order::CreatedAsc),
            )
            .await
    }

    pub async fn add_attachment(
        &self,
        patient_id: &DocumentId,
        filename: &str,
        content: Vec<u8>,
        uploaded_by: DocumentId,
    ) -> HmsResult<Stored<PatientFile>> {
        self.patients.require(patient_id).await?;
        if content.is_empty() {
            return Err(HmsError::invalid("attachment is empty"));
        }
        if content.len() > self.cfg.max_upload_bytes() {
            return Err(HmsError::invalid(format!(
                "attachment exceeds {} bytes",
                self.cfg.max_upload_bytes()
            )));
        }

        let filename = filename.to_string();
        let meta = self
            .with_objects(*patient_id, move |objects| objects.add_bytes(&filename, &content))
            .await?;
        let hash = meta.hash.clone();

        let record = PatientFile::from_metadata(*patient_id, uploaded_by, meta);
        match self.files.create(record).await {
            Ok(created) => {
                tracing::info!(
                    "stored attachment {} for patient {} ({} bytes)",
                    created.id,
                    patient_id,
                    created.data.size_bytes
                );
                Ok(created)
            }
            Err(e) => {
                let cleanup = self
                    .with_objects(*patient_id, move |objects| objects.remove(hash.as_str()))
                    .await;
                if let Err(cleanup) = cleanup {
                    tracing::error!("failed to remove orphaned object: {:?}", cleanup);
                }
                Err(e)
            }
        }
    }

    pub async fn list_attachments(&self, patient_id: &DocumentId) -> HmsResult<Vec<Stored<PatientFile>>> {
        self.patients.require(patient_id).await?;
        self.attachment_docs(patient_id).await
    }

    async fn attachment(
        &self,
        patient_id: &DocumentId,
        file_id: &DocumentId,
    ) -> HmsResult<Stored<PatientFile>> {
        let file = self.files.require(file_id).await?;
        if file.data.patient_id != *patient_id {
            return Err(HmsError::not_found(PatientFile::NAME, file_id));
        }
        Ok(file)
    }

    /// Returns the metadata and bytes of one attachment.
    pub async fn read_attachment(
        &self,
        patient_id: &DocumentId,
        file_id: &DocumentId,
    ) -> HmsResult<(Stored<PatientFile>, Vec<u8>)> {
        let file = self.attachment(patient_id, file_id).await?;
        let hash = file.data.hash.clone();
        let bytes = self
            .with_objects(*patient_id, move |objects| objects.read(hash.as_str()))
            .await?;
        Ok((file, bytes))
    }

    pub async fn delete_attachment(
        &self,
        patient_id: &DocumentId,
        file_id: &DocumentId,
    ) -> HmsResult<()> {
        let file = self.attachment(patient_id, file_id).await?;
        self.files.delete(file_id).await?;

        let hash = file.data.hash.clone();
        self.with_objects(*patient_id, move |objects| objects.remove(hash.as_str()))
            .await?;
        tracing::info!("deleted attachment {} of patient {}", file_id, patient_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::custom_fields::{FieldType, NewCustomField};
    use crate::test_support::test_hms;
    use crate::Hms;
    use serde_json::json;
    use tempfile::TempDir;

    fn ada() -> NewPatient {
        NewPatient {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1815, 12, 10),
            gender: Some(Gender::Female),
            phone: Some("+44 20 7946 0958".into()),
            email: Some("Ada@Example.org".into()),
            allergies: vec!["penicillin".into(), " ".into(), "penicillin".into()],
            ..Default::default()
        }
    }

    fn setup() -> (TempDir, Hms) {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let hms = test_hms(&temp.path().join("objects"));
        (temp, hms)
    }

    #[tokio::test]
    async fn create_normalises_input() {
        let (_temp, hms) = setup();
        let patient = hms.patients().create(ada()).await.unwrap();

        assert_eq!(patient.data.first_name.as_str(), "Ada");
        assert_eq!(patient.data.email.as_ref().unwrap().as_str(), "ada@example.org");
        assert_eq!(patient.data.allergies, vec!["penicillin".to_string()]);
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let (_temp, hms) = setup();
        let patients = hms.patients();

        let mut input = ada();
        input.last_name = " ".into();
        assert!(matches!(patients.create(input).await, Err(HmsError::InvalidInput(_))));

        let mut input = ada();
        input.date_of_birth = Some(Utc::now().date_naive() + chrono::Duration::days(2));
        assert!(patients.create(input).await.is_err());

        let mut input = ada();
        input.email = Some("nope".into());
        assert!(patients.create(input).await.is_err());

        let mut input = ada();
        input.custom = [("unknown".to_string(), json!(1))].into();
        assert!(patients.create(input).await.is_err());
    }

    #[tokio::test]
    async fn partial_update_keeps_and_clears_fields() {
        let (_temp, hms) = setup();
        let patients = hms.patients();
        let patient = patients.create(ada()).await.unwrap();

        let update: PatientUpdate = serde_json::from_value(json!({
            "last_name": "King",
            "phone": "",
            "gender": null
        }))
        .unwrap();
        let updated = patients.update(&patient.id, update).await.unwrap();

        assert_eq!(updated.data.last_name.as_str(), "King");
        assert_eq!(updated.data.first_name.as_str(), "Ada");
        assert_eq!(updated.data.phone, None);
        assert_eq!(updated.data.gender, None);
        assert_eq!(updated.data.date_of_birth, patient.data.date_of_birth);
        assert_eq!(updated.revision, 2);
    }

    #[tokio::test]
    async fn custom_values_merge_on_update() {
        let (_temp, hms) = setup();
        hms.custom_fields()
            .create(NewCustomField {
                entity: CustomFieldEntity::Patient,
                key: "insurer".into(),
                label: "Insurer".into(),
                field_type: FieldType::Text,
                required: false,
                options: vec![],
            })
            .await
            .unwrap();
        let patients = hms.patients();
        let patient = patients.create(ada()).await.unwrap();

        let update: PatientUpdate =
            serde_json::from_value(json!({"custom": {"insurer": "Acme Health"}})).unwrap();
        let updated = patients.update(&patient.id, update).await.unwrap();
        assert_eq!(updated.data.custom["insurer"], "Acme Health");
    }

    #[tokio::test]
    async fn search_matches_names_and_contact_details() {
        let (_temp, hms) = setup();
        let patients = hms.patients();
        patients.create(ada()).await.unwrap();
        patients
            .create(NewPatient {
                first_name: "Alan".into(),
                last_name: "Turing".into(),
                national_id: Some("QQ123456C".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let by_name = patients
            .list(PatientQuery {
                search: Some("love".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_name.total, 1);

        let by_id = patients
            .list(PatientQuery {
                search: Some("qq123".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_id.items[0].data.last_name.as_str(), "Turing");
    }

    #[tokio::test]
    async fn attachments_round_trip() {
        let (_temp, hms) = setup();
        let patients = hms.patients();
        let patient = patients.create(ada()).await.unwrap();
        let uploader = DocumentId::new();

        let pdf = b"%PDF-1.4\n%test document".to_vec();
        let file = patients
            .add_attachment(&patient.id, "../../letters/referral.pdf", pdf.clone(), uploader)
            .await
            .unwrap();
        assert_eq!(file.data.filename, "referral.pdf");
        assert_eq!(file.data.media_type, "application/pdf");

        let dup = patients
            .add_attachment(&patient.id, "copy.pdf", pdf.clone(), uploader)
            .await
            .unwrap_err();
        assert!(matches!(
            dup,
            HmsError::Files(FilesError::FileAlreadyExists(_))
        ));

        let (meta, bytes) = patients.read_attachment(&patient.id, &file.id).await.unwrap();
        assert_eq!(bytes, pdf);
        assert_eq!(meta.id, file.id);

        let other = patients.create(ada()).await.unwrap();
        assert!(matches!(
            patients.read_attachment(&other.id, &file.id).await,
            Err(HmsError::NotFound { .. })
        ));

        patients.delete_attachment(&patient.id, &file.id).await.unwrap();
        assert!(patients.list_attachments(&patient.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_and_oversized_uploads_are_rejected() {
        let temp = TempDir::new().unwrap();
        let cfg = CoreConfig::new(
            crate::StoreBackend::Memory,
            temp.path().join("objects"),
        )
        .with_max_upload_bytes(4);
        let hms = Hms::new(Arc::new(cfg), Arc::new(crate::store::MemoryStore::new()));
        let patients = hms.patients();
        let patient = patients.create(ada()).await.unwrap();

        for content in [vec![], vec![0u8; 5]] {
            let err = patients
                .add_attachment(&patient.id, "x.bin", content, DocumentId::new())
                .await
                .unwrap_err();
            assert!(matches!(err, HmsError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn delete_removes_attachments_but_not_billed_patients() {
        let (temp, hms) = setup();
        let patients = hms.patients();
        let patient = patients.create(ada()).await.unwrap();
        patients
            .add_attachment(&patient.id, "note.txt", b"hello".to_vec(), DocumentId::new())
            .await
            .unwrap();

        patients.delete(&patient.id).await.unwrap();
        assert!(!patient
            .id
            .sharded_dir(&temp.path().join("objects"))
            .exists());
        assert!(matches!(
            patients.get(&patient.id).await,
            Err(HmsError::NotFound { .. })
        ));

        let billed = patients.create(ada()).await.unwrap();
        hms.store()
            .create(
                INVOICES,
                DocumentId::new(),
                json!({"patient_id": billed.id.to_string()}),
            )
            .await
            .unwrap();
        assert!(matches!(
            patients.delete(&billed.id).await,
            Err(HmsError::Conflict(_))
        ));
    }
}
