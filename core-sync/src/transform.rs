//! # Record Transformer
//!
//! Maps a [`SourceRecord`] into the logistics API's [`DeliveryPayload`],
//! validates required fields and strips empty optional ones before sending.
//!
//! ## Field priority
//!
//! | Target | Source |
//! |---|---|
//! | `order_number` | `folio`, else `document_number` |
//! | `customer.name` | `trade_name`, else `customer_name` |
//! | `customer.phone` | `phone`, else `mobile` |
//! | `items[i].sku` | `product_code`, else `alternate_code` |
//! | `total_amount` | `total`, else sum of `quantity * unit_price` |
//!
//! Strings are trimmed and blank strings count as absent.

use crate::record::{
    Customer, DeliveryItem, DeliveryPayload, ShippingAddress, SourceLine, SourceRecord,
};
use crate::{Result, SyncError};
use chrono::SecondsFormat;
use serde_json::{json, Map, Value};

/// Result of mapping one record.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    pub payload: DeliveryPayload,
    /// Dotted paths of missing required fields. Empty when valid.
    pub errors: Vec<String>,
}

impl TransformOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into the payload, or [`SyncError::Validation`] naming the
    /// missing fields.
    pub fn into_payload(self, record_id: i64) -> Result<DeliveryPayload> {
        if self.errors.is_empty() {
            Ok(self.payload)
        } else {
            Err(SyncError::Validation {
                record_id,
                errors: self.errors,
            })
        }
    }
}

/// Map a source record into the destination schema. Never fails.
pub fn transform(record: &SourceRecord) -> TransformOutcome {
    let items: Vec<DeliveryItem> = record.lines.iter().map(transform_line).collect();

    let total_amount = record.total.unwrap_or_else(|| {
        record
            .lines
            .iter()
            .map(|line| line.quantity.unwrap_or(0.0) * line.unit_price.unwrap_or(0.0))
            .sum()
    });

    let payload = DeliveryPayload {
        external_id: record.id.to_string(),
        order_number: first_present(&[&record.folio, &record.document_number]),
        order_date: record
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        customer: Customer {
            code: text(&record.customer_code),
            name: first_present(&[&record.trade_name, &record.customer_name]),
            tax_id: text(&record.tax_id),
            phone: first_present(&[&record.phone, &record.mobile]),
            email: text(&record.email),
        },
        shipping_address: ShippingAddress {
            street: text(&record.address),
            district: text(&record.district),
            city: text(&record.city),
            state: text(&record.state),
            postal_code: text(&record.postal_code),
            country: text(&record.country),
        },
        items,
        total_amount,
        warehouse: text(&record.warehouse),
        notes: text(&record.notes),
    };

    let errors = validate(&payload);
    TransformOutcome { payload, errors }
}

fn transform_line(line: &SourceLine) -> DeliveryItem {
    DeliveryItem {
        sku: first_present(&[&line.product_code, &line.alternate_code]),
        description: text(&line.description),
        quantity: line.quantity.unwrap_or(0.0),
        unit_price: line.unit_price.unwrap_or(0.0),
        weight_kg: line.weight_kg.unwrap_or(0.0),
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn text(value: &Option<String>) -> String {
    non_blank(value).unwrap_or_default().to_string()
}

fn first_present(candidates: &[&Option<String>]) -> String {
    candidates
        .iter()
        .find_map(|candidate| non_blank(candidate))
        .unwrap_or_default()
        .to_string()
}

/// Dotted paths of required fields that are missing from `payload`.
pub fn validate(payload: &DeliveryPayload) -> Vec<String> {
    let mut errors = Vec::new();

    let required = [
        ("order_number", &payload.order_number),
        ("order_date", &payload.order_date),
        ("customer.name", &payload.customer.name),
        ("customer.phone", &payload.customer.phone),
        ("shipping_address.street", &payload.shipping_address.street),
        ("shipping_address.city", &payload.shipping_address.city),
    ];
    for (path, value) in required {
        if value.trim().is_empty() {
            errors.push(path.to_string());
        }
    }

    if payload.items.is_empty() {
        errors.push("items".to_string());
    }
    for (i, item) in payload.items.iter().enumerate() {
        if item.sku.trim().is_empty() {
            errors.push(format!("items.{}.sku", i));
        }
        if !(item.quantity > 0.0) {
            errors.push(format!("items.{}.quantity", i));
        }
    }

    errors
}

/// JSON body for the payload with empty optional fields removed.
///
/// Optional fields are dropped when they are an empty string, zero or null.
/// Required fields are always kept.
pub fn clean_optional_fields(payload: &DeliveryPayload) -> Value {
    let mut customer = Map::new();
    customer.insert("name".into(), json!(payload.customer.name));
    customer.insert("phone".into(), json!(payload.customer.phone));
    insert_text(&mut customer, "code", &payload.customer.code);
    insert_text(&mut customer, "tax_id", &payload.customer.tax_id);
    insert_text(&mut customer, "email", &payload.customer.email);

    let address = &payload.shipping_address;
    let mut shipping = Map::new();
    shipping.insert("street".into(), json!(address.street));
    shipping.insert("city".into(), json!(address.city));
    insert_text(&mut shipping, "district", &address.district);
    insert_text(&mut shipping, "state", &address.state);
    insert_text(&mut shipping, "postal_code", &address.postal_code);
    insert_text(&mut shipping, "country", &address.country);

    let items: Vec<Value> = payload
        .items
        .iter()
        .map(|item| {
            let mut entry = Map::new();
            entry.insert("sku".into(), json!(item.sku));
            entry.insert("quantity".into(), json!(item.quantity));
            insert_text(&mut entry, "description", &item.description);
            insert_number(&mut entry, "unit_price", item.unit_price);
            insert_number(&mut entry, "weight_kg", item.weight_kg);
            Value::Object(entry)
        })
        .collect();

    let mut body = Map::new();
    body.insert("external_id".into(), json!(payload.external_id));
    body.insert("order_number".into(), json!(payload.order_number));
    body.insert("order_date".into(), json!(payload.order_date));
    body.insert("customer".into(), Value::Object(customer));
    body.insert("shipping_address".into(), Value::Object(shipping));
    body.insert("items".into(), Value::Array(items));
    body.insert("total_amount".into(), json!(payload.total_amount));
    insert_text(&mut body, "warehouse", &payload.warehouse);
    insert_text(&mut body, "notes", &payload.notes);

    Value::Object(body)
}

fn insert_text(map: &mut Map<String, Value>, key: &str, value: &str) {
    if !value.is_empty() {
        map.insert(key.to_string(), json!(value));
    }
}

fn insert_number(map: &mut Map<String, Value>, key: &str, value: f64) {
    if value != 0.0 && value.is_finite() {
        map.insert(key.to_string(), json!(value));
    }
}
