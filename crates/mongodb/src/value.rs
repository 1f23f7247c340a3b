//! BSON conversion
//!
//! ObjectIds are exposed as 24-character hex strings. Embedded documents and
//! arrays are exposed as their relaxed extended JSON text, since records are
//! flat column maps.

use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};
use sync_core::{Row, UniversalValue};
use sync_store::{StoreError, StoreResult};

/// Convert a BSON value to a `UniversalValue`.
pub fn bson_to_universal(value: Bson) -> UniversalValue {
    match value {
        Bson::Double(f) => UniversalValue::Float(f),
        Bson::String(s) | Bson::Symbol(s) | Bson::JavaScriptCode(s) => UniversalValue::String(s),
        Bson::Boolean(b) => UniversalValue::Bool(b),
        Bson::Null | Bson::Undefined => UniversalValue::Null,
        Bson::Int32(i) => UniversalValue::Int(i64::from(i)),
        Bson::Int64(i) => UniversalValue::Int(i),
        Bson::Binary(binary) => UniversalValue::Bytes(binary.bytes),
        Bson::ObjectId(oid) => UniversalValue::String(oid.to_hex()),
        Bson::DateTime(dt) => UniversalValue::Timestamp(dt.to_chrono()),
        Bson::Array(_) | Bson::Document(_) => {
            UniversalValue::String(value.into_relaxed_extjson().to_string())
        }
        other => UniversalValue::from_json(other.into_relaxed_extjson()),
    }
}

/// Convert a `UniversalValue` to BSON.
pub fn universal_to_bson(value: &UniversalValue) -> Bson {
    match value {
        UniversalValue::Null => Bson::Null,
        UniversalValue::Bool(b) => Bson::Boolean(*b),
        UniversalValue::Int(i) => Bson::Int64(*i),
        UniversalValue::Float(f) => Bson::Double(*f),
        UniversalValue::String(s) => Bson::String(s.clone()),
        UniversalValue::Bytes(b) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: b.clone(),
        }),
        UniversalValue::Timestamp(ts) => Bson::DateTime(bson::DateTime::from_chrono(*ts)),
    }
}

/// Convert a key value for use in a filter on `key_column`.
///
/// A hex string on the `_id` column is turned back into an ObjectId.
pub fn key_to_bson(key_column: &str, value: &UniversalValue) -> Bson {
    if key_column == "_id" {
        if let Some(oid) = value.as_str().and_then(|s| ObjectId::parse_str(s).ok()) {
            return Bson::ObjectId(oid);
        }
    }
    universal_to_bson(value)
}

/// Convert a fetched document to a row.
pub fn document_to_row(doc: Document) -> Row {
    doc.into_iter()
        .map(|(key, value)| (key, bson_to_universal(value)))
        .collect()
}

/// Parse a JSON filter document.
///
/// Extended JSON such as `{"$oid": "..."}` is accepted.
pub fn parse_filter(table: &str, where_clause: &str) -> StoreResult<Document> {
    let json: serde_json::Value = serde_json::from_str(where_clause.trim())
        .map_err(|e| StoreError::query(table, format!("invalid JSON filter: {e}")))?;
    match Bson::try_from(json) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(_) => Err(StoreError::query(table, "filter must be a JSON object")),
        Err(e) => Err(StoreError::query(table, format!("invalid JSON filter: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_object_id_as_hex() {
        let oid = ObjectId::new();
        let value = bson_to_universal(Bson::ObjectId(oid));
        assert_eq!(value, UniversalValue::String(oid.to_hex()));
        assert_eq!(key_to_bson("_id", &value), Bson::ObjectId(oid));
        assert_eq!(key_to_bson("code", &value), Bson::String(oid.to_hex()));
    }

    #[test]
    fn test_document_to_row() {
        let row = document_to_row(doc! {
            "_id": 3,
            "title": "Heat",
            "rating": 8.3,
            "tags": ["crime", "drama"],
            "gone": null,
        });

        assert_eq!(row["_id"], UniversalValue::Int(3));
        assert_eq!(row["title"], UniversalValue::from("Heat"));
        assert_eq!(row["rating"], UniversalValue::Float(8.3));
        assert_eq!(row["tags"], UniversalValue::from("[\"crime\",\"drama\"]"));
        assert!(row["gone"].is_null());
    }

    #[test]
    fn test_timestamp_conversion() {
        let now = bson::DateTime::now();
        let value = bson_to_universal(Bson::DateTime(now));
        assert_eq!(universal_to_bson(&value), Bson::DateTime(now));
    }

    #[test]
    fn test_parse_filter() {
        let filter = parse_filter("film", r#"{"_id": {"$lt": 3}}"#).unwrap();
        let id_filter = filter.get_document("_id").unwrap();
        assert_eq!(id_filter.keys().collect::<Vec<_>>(), vec!["$lt"]);

        assert!(parse_filter("film", "[1, 2]").is_err());
        assert!(parse_filter("film", "_id < 3").is_err());
    }
}
