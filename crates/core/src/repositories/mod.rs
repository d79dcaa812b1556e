//! Domain services.
//!
//! Each module owns one area of the hospital: its entities, their invariants and the
//! store operations that keep them. Services hold the shared document store and are
//! constructed per operation through [`crate::Hms`].

pub mod appointments;
pub mod billing;
pub mod custom_fields;
pub mod inventory;
pub mod patients;
pub mod prescriptions;
pub mod roles;
pub mod users;

use serde::{Deserialize, Deserializer};

/// Deserialises a present field as `Some`, so `Option<Option<T>>` can tell an absent field
/// (leave unchanged) from an explicit `null` (clear).
pub(crate) fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable")]
        value: Option<Option<u32>>,
    }

    #[test]
    fn nullable_distinguishes_absent_from_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        let null: Patch = serde_json::from_str(r#"{"value": null}"#).unwrap();
        let set: Patch = serde_json::from_str(r#"{"value": 3}"#).unwrap();

        assert_eq!(absent.value, None);
        assert_eq!(null.value, Some(None));
        assert_eq!(set.value, Some(Some(3)));
    }
}
