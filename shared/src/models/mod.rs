//! Data models
//!
//! Shared between the pipeline engine and any consumer built on it.
//! All IDs are `i64` (see [`crate::util::snowflake_id`]).

pub mod deal;
pub mod stage;

// Re-exports
pub use deal::*;
pub use stage::*;

/// Pipeline identifier
pub type PipelineId = i64;
/// Stage identifier
pub type StageId = i64;
/// Deal identifier
pub type DealId = i64;
/// Tag identifier
pub type TagId = i64;

/// Serde helper for `Option<Option<T>>` patch fields.
///
/// Absent field → `None` (leave unchanged), `null` → `Some(None)` (clear),
/// value → `Some(Some(v))` (set). Use with
/// `#[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]`.
pub mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
