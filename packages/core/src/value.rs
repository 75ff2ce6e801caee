//! Closed value type for structured device metadata.
//!
//! Inventory tools report loosely typed fields. They are kept as
//! [`MetadataValue`]s so consumers (report writers, property-list editors)
//! get explicit types instead of re-parsing text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A structured document value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Interprets one `Key: Value` field from an inventory tool.
    ///
    /// `Yes`/`No` become booleans, plain integers and decimals become
    /// numbers, anything else stays text.
    pub fn from_field_text(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed {
            "Yes" => return MetadataValue::Bool(true),
            "No" => return MetadataValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return MetadataValue::Int(i);
        }
        if trimmed.contains('.')
            && let Ok(f) = trimmed.parse::<f64>()
            && f.is_finite()
        {
            return MetadataValue::Double(f);
        }
        MetadataValue::String(trimmed.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Double(f) => Some(*f),
            MetadataValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetadataValue]> {
        match self {
            MetadataValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetadataValue>> {
        match self {
            MetadataValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Looks up `key` when this value is a map.
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.as_map().and_then(|m| m.get(key))
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        // Byte counts above i64::MAX do not occur on real media.
        MetadataValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Double(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(values: Vec<T>) -> Self {
        MetadataValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, MetadataValue>> for MetadataValue {
    fn from(map: BTreeMap<String, MetadataValue>) -> Self {
        MetadataValue::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_field_text() {
        assert_eq!(MetadataValue::from_field_text("Yes"), MetadataValue::Bool(true));
        assert_eq!(MetadataValue::from_field_text(" No "), MetadataValue::Bool(false));
        assert_eq!(MetadataValue::from_field_text("512"), MetadataValue::Int(512));
        assert_eq!(MetadataValue::from_field_text("1.5"), MetadataValue::Double(1.5));
        assert_eq!(
            MetadataValue::from_field_text("209.7 MB (209715200 Bytes)"),
            MetadataValue::String("209.7 MB (209715200 Bytes)".to_string())
        );
    }

    #[test]
    fn test_accessors() {
        let mut map = BTreeMap::new();
        map.insert("identifier".to_string(), MetadataValue::from("disk2s1"));
        map.insert("partitions".to_string(), MetadataValue::from(vec!["disk2s1", "disk2s2"]));
        let value = MetadataValue::from(map);

        assert_eq!(value.get("identifier").and_then(|v| v.as_str()), Some("disk2s1"));
        assert_eq!(
            value.get("partitions").and_then(|v| v.as_list()).map(|l| l.len()),
            Some(2)
        );
        assert_eq!(MetadataValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(MetadataValue::Bool(true).as_i64(), None);
    }

    #[test]
    fn test_untagged_json() {
        let value = MetadataValue::from(vec![
            MetadataValue::Bool(true),
            MetadataValue::Int(7),
            MetadataValue::from("x"),
        ]);
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"[true,7,"x"]"#);
    }
}
