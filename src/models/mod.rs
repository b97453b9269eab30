//! Domain model module declarations.

use serde::{Deserialize, Deserializer};

pub mod identity;
pub mod job;
pub mod output;

/// Deserialize a dispatcher identifier as a plain string key.
///
/// The dispatcher emits integer primary keys, but identifiers are opaque to
/// the agent, so string keys are accepted as well and both are normalized to
/// their decimal/text form.
pub(crate) fn deserialize_flexible_id<'de, D>(
    deserializer: D,
) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Int(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}
