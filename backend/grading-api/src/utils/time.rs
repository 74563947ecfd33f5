use chrono::{DateTime, Utc};
use mongodb::bson::Bson;

/// Encodes a timestamp the same way the serde models store it, so `$set`
/// updates stay readable by `Submission`'s deserializer.
pub fn chrono_to_bson(dt: DateTime<Utc>) -> Bson {
    mongodb::bson::to_bson(&dt).unwrap_or_else(|_| Bson::String(dt.to_rfc3339()))
}
