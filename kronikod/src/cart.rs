//! Shopping cart on top of the event store.
//!
//! A cart is the fold of its `ItemAdded`, `ItemRemoved` and `CartCleared`
//! events. Commands read the cart's history, decide, and write guarded by
//! an append condition over the same query with the last observed position
//! as watermark: a concurrent change to the cart turns into a conflict.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use kroniko_domain::{value_text, AppendCondition, Event, Position, Query, QueryItem, SequencedEvent, StoredEvent};
use kroniko_eventlog::{EventStore, ReadOptions};

use crate::error::{DaemonError, DaemonResult};

pub const ITEM_ADDED: &str = "ItemAdded";
pub const ITEM_REMOVED: &str = "ItemRemoved";
pub const CART_CLEARED: &str = "CartCleared";

/// Attributes an `ItemAdded` request must carry
pub const REQUIRED_ITEM_FIELDS: [&str; 6] =
    ["cart_id", "description", "image", "price", "item_id", "product_id"];

const ITEM_FIELDS: [&str; 6] = ["item_id", "cart_id", "product_id", "image", "price", "description"];

/// Every event that changes one cart
pub fn cart_query(cart_id: &str) -> Query {
    Query::item(
        QueryItem::new()
            .types([ITEM_ADDED, ITEM_REMOVED, CART_CLEARED])
            .property("cart_id", cart_id),
    )
}

/// Current contents of a cart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartView {
    pub cart_id: String,
    pub items: Vec<Map<String, Value>>,
    pub total: f64,
}

impl CartView {
    /// Fold a cart's events, oldest first
    pub fn fold<'a>(cart_id: &str, events: impl IntoIterator<Item = &'a StoredEvent>) -> Self {
        let mut view = Self {
            cart_id: cart_id.to_string(),
            items: Vec::new(),
            total: 0.0,
        };

        for event in events {
            match event.event_type.as_str() {
                ITEM_ADDED => {
                    let item: Map<String, Value> = ITEM_FIELDS
                        .iter()
                        .map(|field| {
                            let value = event.get(field).cloned().unwrap_or(Value::Null);
                            (field.to_string(), value)
                        })
                        .collect();
                    view.total += price_of(item.get("price"));
                    view.items.push(item);
                }
                ITEM_REMOVED => {
                    let Some(item_id) = event.get("item_id").map(value_text) else {
                        continue;
                    };
                    if let Some(index) = view.position_of_item(&item_id) {
                        let removed = view.items.remove(index);
                        view.total -= price_of(removed.get("price"));
                    }
                }
                CART_CLEARED => {
                    view.items.clear();
                    view.total = 0.0;
                }
                _ => {}
            }
        }
        view
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.position_of_item(item_id).is_some()
    }

    fn position_of_item(&self, item_id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.get("item_id").map(value_text).as_deref() == Some(item_id))
    }
}

/// Numeric price of a stored value; strings are parsed, anything else is 0
fn price_of(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Cart commands and queries.
pub struct CartService {
    store: Arc<EventStore>,
    max_items: usize,
}

impl CartService {
    pub fn new(store: Arc<EventStore>, max_items: usize) -> Self {
        Self { store, max_items }
    }

    /// Current contents of a cart
    pub async fn view(&self, cart_id: &str) -> DaemonResult<CartView> {
        let (view, _) = self.load(cart_id).await?;
        Ok(view)
    }

    /// Add an item unless the cart is full.
    ///
    /// `request` must carry every field in [`REQUIRED_ITEM_FIELDS`].
    pub async fn add_item(&self, request: &Map<String, Value>) -> DaemonResult<StoredEvent> {
        let missing: Vec<&str> = REQUIRED_ITEM_FIELDS
            .iter()
            .copied()
            .filter(|field| !request.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            return Err(DaemonError::InvalidRequest(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            )));
        }

        let field = |name: &str| request.get(name).cloned().unwrap_or(Value::Null);
        let cart_id = value_text(&field("cart_id"));
        let (view, after) = self.load(&cart_id).await?;
        if view.item_count() >= self.max_items {
            return Err(DaemonError::CartFull {
                cart_id,
                max: self.max_items,
            });
        }

        let data: Map<String, Value> = ITEM_FIELDS
            .iter()
            .map(|name| (name.to_string(), field(*name)))
            .collect();
        let stored = self.write_guarded(&cart_id, Event::new(ITEM_ADDED, data)?, after).await?;

        info!(cart_id = %cart_id, event_id = %stored.id, "Item added to cart");
        Ok(stored)
    }

    /// Remove an item that is currently in the cart
    pub async fn remove_item(&self, cart_id: &str, item_id: &str) -> DaemonResult<StoredEvent> {
        let (view, after) = self.load(cart_id).await?;
        if !view.contains(item_id) {
            return Err(DaemonError::ItemNotFound {
                cart_id: cart_id.to_string(),
                item_id: item_id.to_string(),
            });
        }

        let event = Event::with_value(
            ITEM_REMOVED,
            serde_json::json!({"cart_id": cart_id, "item_id": item_id}),
        )?;
        self.write_guarded(cart_id, event, after).await
    }

    /// Empty a cart
    pub async fn clear(&self, cart_id: &str) -> DaemonResult<StoredEvent> {
        let event = Event::with_value(CART_CLEARED, serde_json::json!({"cart_id": cart_id}))?;
        Ok(self.store.write_one(event, None).await?)
    }

    async fn load(&self, cart_id: &str) -> DaemonResult<(CartView, Position)> {
        let history: Vec<SequencedEvent> = self
            .store
            .read(&cart_query(cart_id), ReadOptions::new())
            .await?;
        let after = history.last().map(|e| e.position).unwrap_or(0);
        let view = CartView::fold(cart_id, history.iter().map(|e| &e.event));
        Ok((view, after))
    }

    async fn write_guarded(&self, cart_id: &str, event: Event, after: Position) -> DaemonResult<StoredEvent> {
        let condition = AppendCondition::new(cart_query(cart_id)).after(after);
        Ok(self.store.write_one(event, Some(condition)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kroniko_domain::EventId;
    use serde_json::json;

    fn stored(event_type: &str, data: Value) -> StoredEvent {
        Event::with_value(event_type, data)
            .unwrap()
            .into_stored(EventId::generate())
    }

    fn added(item_id: &str, price: Value) -> StoredEvent {
        stored(
            ITEM_ADDED,
            json!({
                "cart_id": "42",
                "item_id": item_id,
                "product_id": "p",
                "description": "d",
                "image": "i.png",
                "price": price,
            }),
        )
    }

    #[test]
    fn test_fold_adds_and_removes() {
        let events = vec![
            added("1", json!(10)),
            added("2", json!("2.5")),
            stored(ITEM_REMOVED, json!({"cart_id": "42", "item_id": "1"})),
        ];

        let view = CartView::fold("42", &events);
        assert_eq!(view.item_count(), 1);
        assert!(view.contains("2"));
        assert!(!view.contains("1"));
        assert!((view.total - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fold_clear_resets() {
        let events = vec![
            added("1", json!(10)),
            stored(CART_CLEARED, json!({"cart_id": "42"})),
            added("3", json!(4)),
        ];

        let view = CartView::fold("42", &events);
        assert_eq!(view.item_count(), 1);
        assert!((view.total - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_removing_unknown_item_is_ignored() {
        let events = vec![
            added("1", json!(10)),
            stored(ITEM_REMOVED, json!({"cart_id": "42", "item_id": "9"})),
        ];

        let view = CartView::fold("42", &events);
        assert_eq!(view.item_count(), 1);
    }

    #[test]
    fn test_item_shape() {
        let view = CartView::fold("42", &[added("1", json!(10))]);
        assert_eq!(
            Value::Object(view.items[0].clone()),
            json!({
                "item_id": "1",
                "cart_id": "42",
                "product_id": "p",
                "image": "i.png",
                "price": 10,
                "description": "d",
            })
        );
    }
}
