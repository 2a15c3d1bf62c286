//! Inbound ERP event schemas.
//!
//! Each topic carries one JSON shape. Parsing validates presence, types and
//! ranges up front, so nothing downstream ever sees a half-valid event and no
//! catalog call is made for malformed input.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Number, Value};

use larder_core::{ProductId, Sku, SyncError, SyncResult};

use crate::topic::Topic;

/// A typed event parsed from the decoded JSON of one topic.
pub trait EventSchema: Sized {
    const TOPIC: Topic;

    fn from_json(value: &Value) -> SyncResult<Self>;
}

/// How an event points at its product: an explicit id, a SKU, or both.
pub trait ProductRef {
    fn product_id(&self) -> Option<&ProductId>;

    fn sku(&self) -> Option<&Sku>;
}

/// `product_updates`: descriptive attributes of a product.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductUpdateEvent {
    pub id: Option<ProductId>,
    pub sku: Option<Sku>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub weight: Option<f64>,
    pub unit: Option<String>,
    pub is_active: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// `price_updates`: absolute unit price.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdateEvent {
    pub product_id: Option<ProductId>,
    pub sku: Sku,
    pub price: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// `stock_updates`: absolute on-hand quantity (not a delta).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockUpdateEvent {
    pub product_id: Option<ProductId>,
    pub sku: Sku,
    pub stock: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Any inbound event, tagged by the topic it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Product(ProductUpdateEvent),
    Price(PriceUpdateEvent),
    Stock(StockUpdateEvent),
}

impl InboundEvent {
    pub fn parse(topic: Topic, value: &Value) -> SyncResult<Self> {
        match topic {
            Topic::Product => ProductUpdateEvent::from_json(value).map(Self::Product),
            Topic::Price => PriceUpdateEvent::from_json(value).map(Self::Price),
            Topic::Stock => StockUpdateEvent::from_json(value).map(Self::Stock),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProductUpdate {
    id: Option<String>,
    sku: Option<String>,
    name: Option<String>,
    description: Option<String>,
    category: Option<String>,
    brand: Option<String>,
    weight: Option<Number>,
    unit: Option<String>,
    is_active: Option<bool>,
    timestamp: Option<Number>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPriceUpdate {
    product_id: Option<String>,
    sku: Option<String>,
    price: Option<Number>,
    timestamp: Option<Number>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStockUpdate {
    product_id: Option<String>,
    sku: Option<String>,
    stock: Option<Number>,
    timestamp: Option<Number>,
}

impl EventSchema for ProductUpdateEvent {
    const TOPIC: Topic = Topic::Product;

    fn from_json(value: &Value) -> SyncResult<Self> {
        let raw: RawProductUpdate = decode(value, Self::TOPIC)?;

        let id = optional_ref(raw.id, ProductId::parse)?;
        let sku = optional_ref(raw.sku, Sku::parse)?;
        if id.is_none() && sku.is_none() {
            return Err(SyncError::validation(
                "product_updates: either id or sku is required",
            ));
        }

        Ok(Self {
            id,
            sku,
            name: raw.name,
            description: raw.description,
            category: raw.category,
            brand: raw.brand,
            weight: raw.weight.map(|w| non_negative("weight", &w)).transpose()?,
            unit: raw.unit,
            is_active: raw.is_active,
            timestamp: timestamp(raw.timestamp)?,
        })
    }
}

impl EventSchema for PriceUpdateEvent {
    const TOPIC: Topic = Topic::Price;

    fn from_json(value: &Value) -> SyncResult<Self> {
        let raw: RawPriceUpdate = decode(value, Self::TOPIC)?;
        let price = raw
            .price
            .ok_or_else(|| SyncError::validation("price_updates: price is required"))?;

        Ok(Self {
            product_id: optional_ref(raw.product_id, ProductId::parse)?,
            sku: required_sku(raw.sku, Self::TOPIC)?,
            price: non_negative("price", &price)?,
            timestamp: timestamp(raw.timestamp)?,
        })
    }
}

impl EventSchema for StockUpdateEvent {
    const TOPIC: Topic = Topic::Stock;

    fn from_json(value: &Value) -> SyncResult<Self> {
        let raw: RawStockUpdate = decode(value, Self::TOPIC)?;
        let stock = raw
            .stock
            .ok_or_else(|| SyncError::validation("stock_updates: stock is required"))?;

        Ok(Self {
            product_id: optional_ref(raw.product_id, ProductId::parse)?,
            sku: required_sku(raw.sku, Self::TOPIC)?,
            stock: whole_quantity("stock", &stock)?,
            timestamp: timestamp(raw.timestamp)?,
        })
    }
}

impl ProductRef for ProductUpdateEvent {
    fn product_id(&self) -> Option<&ProductId> {
        self.id.as_ref()
    }

    fn sku(&self) -> Option<&Sku> {
        self.sku.as_ref()
    }
}

impl ProductRef for PriceUpdateEvent {
    fn product_id(&self) -> Option<&ProductId> {
        self.product_id.as_ref()
    }

    fn sku(&self) -> Option<&Sku> {
        Some(&self.sku)
    }
}

impl ProductRef for StockUpdateEvent {
    fn product_id(&self) -> Option<&ProductId> {
        self.product_id.as_ref()
    }

    fn sku(&self) -> Option<&Sku> {
        Some(&self.sku)
    }
}

fn decode<'de, T: Deserialize<'de>>(value: &'de Value, topic: Topic) -> SyncResult<T> {
    T::deserialize(value).map_err(|e| SyncError::validation(format!("{topic}: {e}")))
}

/// Optional references treat a blank string the same as an absent field.
fn optional_ref<T>(
    value: Option<String>,
    parse: impl FnOnce(String) -> SyncResult<T>,
) -> SyncResult<Option<T>> {
    match value {
        Some(v) if !v.trim().is_empty() => parse(v).map(Some),
        _ => Ok(None),
    }
}

fn required_sku(value: Option<String>, topic: Topic) -> SyncResult<Sku> {
    let sku = value.ok_or_else(|| SyncError::validation(format!("{topic}: sku is required")))?;
    Sku::parse(sku).map_err(|e| SyncError::validation(format!("{topic}: {e}")))
}

fn non_negative(field: &str, n: &Number) -> SyncResult<f64> {
    let v = n
        .as_f64()
        .ok_or_else(|| SyncError::validation(format!("{field} is not a finite number")))?;
    if v < 0.0 {
        return Err(SyncError::validation(format!("{field} must be >= 0, got {v}")));
    }
    Ok(v)
}

fn whole_quantity(field: &str, n: &Number) -> SyncResult<u64> {
    if let Some(v) = n.as_u64() {
        return Ok(v);
    }
    if let Some(v) = n.as_i64() {
        return Err(SyncError::validation(format!("{field} must be >= 0, got {v}")));
    }

    // JSON writers may render whole numbers as floats (e.g. `12.0`).
    match n.as_f64() {
        Some(v) if v < 0.0 => Err(SyncError::validation(format!(
            "{field} must be >= 0, got {v}"
        ))),
        Some(v) if v.fract() == 0.0 && v < u64::MAX as f64 => Ok(v as u64),
        _ => Err(SyncError::validation(format!("{field} must be an integer, got {n}"))),
    }
}

fn timestamp(value: Option<Number>) -> SyncResult<Option<DateTime<Utc>>> {
    let Some(n) = value else {
        return Ok(None);
    };

    let millis = whole_quantity("timestamp", &n)?;
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(Some)
        .ok_or_else(|| SyncError::validation(format!("timestamp out of range: {n}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn is_validation<T: core::fmt::Debug>(res: SyncResult<T>) -> bool {
        matches!(res, Err(SyncError::Validation(_)))
    }

    #[test]
    fn product_update_requires_id_or_sku() {
        assert!(is_validation(ProductUpdateEvent::from_json(
            &json!({ "name": "Whole milk" })
        )));
        assert!(is_validation(ProductUpdateEvent::from_json(
            &json!({ "id": "", "sku": "  ", "name": "Whole milk" })
        )));

        let by_sku = ProductUpdateEvent::from_json(&json!({ "sku": "MILK-1L" })).unwrap();
        assert_eq!(by_sku.sku().map(Sku::as_str), Some("MILK-1L"));
        assert!(by_sku.product_id().is_none());
    }

    #[test]
    fn product_update_keeps_only_present_fields() {
        let event = ProductUpdateEvent::from_json(&json!({
            "id": "p1",
            "name": "Oat milk",
            "isActive": false,
            "brand": null,
            "timestamp": 1_700_000_000_000u64,
        }))
        .unwrap();

        assert_eq!(event.id, Some(ProductId::parse("p1").unwrap()));
        assert_eq!(event.name.as_deref(), Some("Oat milk"));
        assert_eq!(event.is_active, Some(false));
        assert_eq!(event.brand, None);
        assert_eq!(event.weight, None);
        assert_eq!(
            event.timestamp.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn product_update_rejects_negative_weight() {
        assert!(is_validation(ProductUpdateEvent::from_json(
            &json!({ "sku": "A", "weight": -0.5 })
        )));
    }

    #[test]
    fn price_update_requires_sku() {
        assert!(is_validation(PriceUpdateEvent::from_json(
            &json!({ "productId": "p1", "price": 1.0 })
        )));
    }

    #[test]
    fn price_must_be_numeric_and_non_negative() {
        assert!(is_validation(PriceUpdateEvent::from_json(
            &json!({ "sku": "A", "price": "3.49" })
        )));
        assert!(is_validation(PriceUpdateEvent::from_json(
            &json!({ "sku": "A", "price": -0.01 })
        )));
        assert!(is_validation(PriceUpdateEvent::from_json(&json!({ "sku": "A" }))));

        let ok = PriceUpdateEvent::from_json(&json!({ "sku": "MILK-1L", "price": 3.49 })).unwrap();
        assert_eq!(ok.price, 3.49);
        assert!(ok.product_id.is_none());
    }

    #[test]
    fn stock_must_be_a_non_negative_integer() {
        assert!(is_validation(StockUpdateEvent::from_json(
            &json!({ "sku": "A", "stock": 2.5 })
        )));
        assert!(is_validation(StockUpdateEvent::from_json(
            &json!({ "sku": "A", "stock": -1 })
        )));

        let zero = StockUpdateEvent::from_json(
            &json!({ "sku": "ABC123", "stock": 0, "productId": "p1" }),
        )
        .unwrap();
        assert_eq!(zero.stock, 0);
        assert_eq!(zero.product_id().map(ProductId::as_str), Some("p1"));

        let float_whole =
            StockUpdateEvent::from_json(&json!({ "sku": "A", "stock": 12.0 })).unwrap();
        assert_eq!(float_whole.stock, 12);
    }

    #[test]
    fn float_stock_beyond_u64_is_rejected() {
        // 2^64 is the first float past u64::MAX; it must not saturate.
        assert!(is_validation(StockUpdateEvent::from_json(
            &json!({ "sku": "A", "stock": 18_446_744_073_709_551_616.0f64 })
        )));
        assert!(is_validation(StockUpdateEvent::from_json(
            &json!({ "sku": "A", "stock": 1.0e30 })
        )));
    }

    #[test]
    fn malformed_timestamps_are_rejected() {
        for ts in [json!("yesterday"), json!(-5), json!(1.5)] {
            assert!(is_validation(StockUpdateEvent::from_json(
                &json!({ "sku": "A", "stock": 1, "timestamp": ts })
            )));
        }
    }

    #[test]
    fn non_object_payloads_are_rejected() {
        assert!(is_validation(StockUpdateEvent::from_json(&json!([1, 2, 3]))));
        assert!(is_validation(InboundEvent::parse(Topic::Price, &json!("MILK-1L"))));
    }

    #[test]
    fn inbound_event_dispatches_on_topic() {
        let event = InboundEvent::parse(Topic::Stock, &json!({ "sku": "A", "stock": 3 })).unwrap();
        assert!(matches!(event, InboundEvent::Stock(StockUpdateEvent { stock: 3, .. })));
    }

    proptest! {
        #[test]
        fn negative_prices_never_validate(price in -1.0e9f64..-1.0e-9) {
            let res = PriceUpdateEvent::from_json(&json!({ "sku": "A", "price": price }));
            prop_assert!(is_validation(res));
        }

        #[test]
        fn non_negative_prices_always_validate(price in 0.0f64..1.0e9) {
            let res = PriceUpdateEvent::from_json(&json!({ "sku": "A", "price": price }));
            prop_assert_eq!(res.map(|e| e.price), Ok(price));
        }

        #[test]
        fn negative_stock_never_validates(stock in i64::MIN..0) {
            let res = StockUpdateEvent::from_json(&json!({ "sku": "A", "stock": stock }));
            prop_assert!(is_validation(res));
        }

        #[test]
        fn whole_stock_always_validates(stock in 0u64..u64::MAX) {
            let res = StockUpdateEvent::from_json(&json!({ "sku": "A", "stock": stock }));
            prop_assert_eq!(res.map(|e| e.stock), Ok(stock));
        }
    }
}
