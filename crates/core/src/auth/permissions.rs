use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// A capability granted through roles.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub enum Permission {
    #[serde(rename = "patients.read")]
    PatientsRead,
    #[serde(rename = "patients.write")]
    PatientsWrite,
    #[serde(rename = "appointments.read")]
    AppointmentsRead,
    #[serde(rename = "appointments.write")]
    AppointmentsWrite,
    #[serde(rename = "prescriptions.read")]
    PrescriptionsRead,
    #[serde(rename = "prescriptions.write")]
    PrescriptionsWrite,
    #[serde(rename = "inventory.read")]
    InventoryRead,
    #[serde(rename = "inventory.write")]
    InventoryWrite,
    #[serde(rename = "billing.read")]
    BillingRead,
    #[serde(rename = "billing.write")]
    BillingWrite,
    #[serde(rename = "users.manage")]
    UsersManage,
    #[serde(rename = "settings.manage")]
    SettingsManage,
}

impl Permission {
    pub const ALL: [Permission; 12] = [
        Permission::PatientsRead,
        Permission::PatientsWrite,
        Permission::AppointmentsRead,
        Permission::AppointmentsWrite,
        Permission::PrescriptionsRead,
        Permission::PrescriptionsWrite,
        Permission::InventoryRead,
        Permission::InventoryWrite,
        Permission::BillingRead,
        Permission::BillingWrite,
        Permission::UsersManage,
        Permission::SettingsManage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::PatientsRead => "patients.read",
            Permission::PatientsWrite => "patients.write",
            Permission::AppointmentsRead => "appointments.read",
            Permission::AppointmentsWrite => "appointments.write",
            Permission::PrescriptionsRead => "prescriptions.read",
            Permission::PrescriptionsWrite => "prescriptions.write",
            Permission::InventoryRead => "inventory.read",
            Permission::InventoryWrite => "inventory.write",
            Permission::BillingRead => "billing.read",
            Permission::BillingWrite => "billing.write",
            Permission::UsersManage => "users.manage",
            Permission::SettingsManage => "settings.manage",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names_match_display() {
        for permission in Permission::ALL {
            let json = serde_json::to_string(&permission).unwrap();
            assert_eq!(json, format!("\"{}\"", permission));
        }
    }

    #[test]
    fn unknown_permissions_do_not_parse() {
        assert!(serde_json::from_str::<Permission>("\"patients.delete\"").is_err());
    }
}
