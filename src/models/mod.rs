pub mod audit;
pub mod dependency;
pub mod member;
pub mod organization;
pub mod project;
pub mod task;
pub mod team;
pub mod transaction;
pub mod user;
pub mod work_log;

use serde::{Deserialize, Deserializer};

/// Patch field that tells "absent" (`None`) apart from an explicit `null` (`Some(None)`).
/// Pair with `#[serde(default)]`.
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
    use uuid::Uuid;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable")]
        owner: Option<Option<Uuid>>,
    }

    #[test]
    fn nullable_separates_absent_from_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.owner, None);

        let cleared: Patch = serde_json::from_str(r#"{"owner": null}"#).unwrap();
        assert_eq!(cleared.owner, Some(None));

        let id = Uuid::new_v4();
        let set: Patch = serde_json::from_str(&format!(r#"{{"owner": "{id}"}}"#)).unwrap();
        assert_eq!(set.owner, Some(Some(id)));
    }
}
