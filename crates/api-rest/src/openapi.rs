use crate::routes::{
    appointments, auth, custom_fields, health, invoices, medications, patients, prescriptions,
    roles, users, PageRes,
};
use api_shared::{ErrorRes, HealthRes, LoginReq};
use hms_core::repositories::appointments::{
    Appointment, AppointmentStatus, AppointmentUpdate, NewAppointment,
};
use hms_core::repositories::billing::{
    Invoice, InvoiceItem, InvoiceStatus, InvoiceUpdate, NewInvoice, NewInvoiceItem, NewPayment,
    Payment, PaymentMethod,
};
use hms_core::repositories::custom_fields::{
    CustomField, CustomFieldEntity, CustomFieldUpdate, FieldType, NewCustomField,
};
use hms_core::repositories::inventory::{
    DosageForm, Medication, MedicationUpdate, MovementReason, NewMedication, StockAdjustment,
    StockMovement,
};
use hms_core::repositories::patients::{
    BloodGroup, EmergencyContact, Gender, NewPatient, Patient, PatientFile, PatientUpdate,
};
use hms_core::repositories::prescriptions::{
    NewPrescription, NewPrescriptionItem, Prescription, PrescriptionItem, PrescriptionStatus,
    PrescriptionUpdate,
};
use hms_core::repositories::roles::{NewRole, Role, RoleUpdate};
use hms_core::repositories::users::{NewUser, User, UserUpdate};
use hms_core::Permission;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(title = "HMS REST API", description = "Hospital administration"),
    paths(
        health::health,
        auth::login,
        auth::logout,
        auth::me,
        users::list_users,
        users::get_user,
        users::create_user,
        users::update_user,
        users::delete_user,
        users::set_password,
        roles::list_roles,
        roles::get_role,
        roles::create_role,
        roles::update_role,
        roles::delete_role,
        custom_fields::list_fields,
        custom_fields::create_field,
        custom_fields::update_field,
        custom_fields::delete_field,
        patients::list_patients,
        patients::get_patient,
        patients::create_patient,
        patients::update_patient,
        patients::delete_patient,
        patients::list_files,
        patients::upload_file,
        patients::download_file,
        patients::delete_file,
        appointments::list_appointments,
        appointments::get_appointment,
        appointments::create_appointment,
        appointments::update_appointment,
        appointments::set_appointment_status,
        appointments::delete_appointment,
        medications::list_medications,
        medications::get_medication,
        medications::create_medication,
        medications::update_medication,
        medications::delete_medication,
        medications::adjust_stock,
        medications::list_movements,
        prescriptions::list_prescriptions,
        prescriptions::get_prescription,
        prescriptions::create_prescription,
        prescriptions::update_prescription,
        prescriptions::set_prescription_status,
        prescriptions::delete_prescription,
        prescriptions::dispense_prescription,
        prescriptions::invoice_prescription,
        invoices::list_invoices,
        invoices::get_invoice,
        invoices::create_invoice,
        invoices::update_invoice,
        invoices::set_invoice_status,
        invoices::delete_invoice,
        invoices::list_payments,
        invoices::record_payment,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        PageRes,
        LoginReq,
        auth::LoginRes,
        auth::MeRes,
        Permission,
        User,
        NewUser,
        UserUpdate,
        users::PasswordReq,
        Role,
        NewRole,
        RoleUpdate,
        CustomField,
        CustomFieldEntity,
        FieldType,
        NewCustomField,
        CustomFieldUpdate,
        Patient,
        Gender,
        BloodGroup,
        EmergencyContact,
        NewPatient,
        PatientUpdate,
        PatientFile,
        Appointment,
        AppointmentStatus,
        NewAppointment,
        AppointmentUpdate,
        appointments::AppointmentStatusReq,
        Medication,
        DosageForm,
        NewMedication,
        MedicationUpdate,
        StockAdjustment,
        StockMovement,
        MovementReason,
        Prescription,
        PrescriptionItem,
        PrescriptionStatus,
        NewPrescription,
        NewPrescriptionItem,
        PrescriptionUpdate,
        prescriptions::PrescriptionStatusReq,
        Invoice,
        InvoiceItem,
        InvoiceStatus,
        NewInvoice,
        NewInvoiceItem,
        InvoiceUpdate,
        invoices::InvoiceStatusReq,
        Payment,
        PaymentMethod,
        NewPayment,
    )),
    tags(
        (name = "health"),
        (name = "auth", description = "Sessions"),
        (name = "users", description = "Staff accounts"),
        (name = "roles", description = "Named permission sets"),
        (name = "custom-fields", description = "Custom field definitions"),
        (name = "patients"),
        (name = "appointments"),
        (name = "inventory", description = "Medications and the stock ledger"),
        (name = "prescriptions"),
        (name = "billing", description = "Invoices and payments"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_resource() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/auth/login",
            "/patients/{id}/files",
            "/medications/{id}/stock",
            "/prescriptions/{id}/dispense",
            "/invoices/{id}/payments",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
