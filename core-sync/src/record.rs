//! # Order Records
//!
//! Shapes on both sides of the pipeline: [`SourceRecord`] as read from the
//! ERP store, and [`DeliveryPayload`] as accepted by the logistics API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One order row discovered in the source store.
///
/// Only `id` and `timestamp` are required; every other column defaults when
/// absent. Records are read-only inside the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Monotonically assigned numeric key.
    pub id: i64,
    /// Business timestamp (creation time of the order).
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub folio: Option<String>,
    #[serde(default)]
    pub document_number: Option<String>,
    #[serde(default)]
    pub customer_code: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub trade_name: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub lines: Vec<SourceLine>,
}

impl SourceRecord {
    /// A record with only its key and timestamp set.
    pub fn new(id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            timestamp,
            folio: None,
            document_number: None,
            customer_code: None,
            customer_name: None,
            trade_name: None,
            tax_id: None,
            phone: None,
            mobile: None,
            email: None,
            address: None,
            district: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            warehouse: None,
            notes: None,
            total: None,
            lines: Vec::new(),
        }
    }

    /// Lexicographic position of this record in the change stream.
    pub fn cursor(&self) -> (DateTime<Utc>, i64) {
        (self.timestamp, self.id)
    }
}

/// One order line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceLine {
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub alternate_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
}

/// Order in the shape the logistics API expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub external_id: String,
    pub order_number: String,
    pub order_date: String,
    pub customer: Customer,
    pub shipping_address: ShippingAddress,
    pub items: Vec<DeliveryItem>,
    pub total_amount: f64,
    pub warehouse: String,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub code: String,
    pub name: String,
    pub tax_id: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub district: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryItem {
    pub sku: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub weight_kg: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_record_defaults_missing_columns() {
        let record: SourceRecord = serde_json::from_value(serde_json::json!({
            "id": 42,
            "timestamp": "2024-05-01T10:00:00Z",
            "folio": "F-42"
        }))
        .unwrap();

        assert_eq!(record.id, 42);
        assert_eq!(record.folio.as_deref(), Some("F-42"));
        assert!(record.customer_name.is_none());
        assert!(record.lines.is_empty());
    }

    #[test]
    fn test_source_record_requires_key_and_timestamp() {
        let result: Result<SourceRecord, _> =
            serde_json::from_value(serde_json::json!({ "folio": "F-1" }));
        assert!(result.is_err());
    }
}
