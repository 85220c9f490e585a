//! Cart event builders and async test utilities.

use std::future::Future;
use std::time::Duration;

use serde_json::{json, Value};

use crate::Result;
use kroniko_domain::{Event, Query, QueryItem};

/// Attributes of an `ItemAdded` event.
pub struct ItemDetails {
    pub cart_id: String,
    pub item_id: String,
    pub product_id: String,
    pub description: String,
    pub image: String,
    pub price: Value,
}

impl ItemDetails {
    /// Item with placeholder description, image and price
    pub fn new(cart_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        let item_id = item_id.into();
        Self {
            cart_id: cart_id.into(),
            product_id: format!("product-{}", item_id),
            description: format!("Item {}", item_id),
            image: format!("{}.png", item_id),
            price: json!(10),
            item_id,
        }
    }

    pub fn price(mut self, price: impl Into<Value>) -> Self {
        self.price = price.into();
        self
    }
}

/// `ItemAdded` event for a cart
pub fn item_added(details: ItemDetails) -> Result<Event> {
    Ok(Event::with_value(
        "ItemAdded",
        json!({
            "cart_id": details.cart_id,
            "item_id": details.item_id,
            "product_id": details.product_id,
            "description": details.description,
            "image": details.image,
            "price": details.price,
        }),
    )?)
}

/// `ItemRemoved` event for a cart
pub fn item_removed(cart_id: &str, item_id: &str) -> Result<Event> {
    Ok(Event::with_value(
        "ItemRemoved",
        json!({"cart_id": cart_id, "item_id": item_id}),
    )?)
}

/// `CartCleared` event for a cart
pub fn cart_cleared(cart_id: &str) -> Result<Event> {
    Ok(Event::with_value("CartCleared", json!({"cart_id": cart_id}))?)
}

/// Every item event of one cart
pub fn cart_query(cart_id: &str) -> Query {
    Query::item(
        QueryItem::new()
            .types(["ItemAdded", "ItemRemoved", "CartCleared"])
            .property("cart_id", cart_id),
    )
}

/// Poll `check` until it returns true or `timeout` elapses.
///
/// Returns whether the condition was observed.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_item_added_carries_all_attributes() {
        let event = item_added(ItemDetails::new("42", "7").price(25)).unwrap();
        assert_eq!(event.event_type(), "ItemAdded");
        assert_eq!(event.data()["cart_id"], json!("42"));
        assert_eq!(event.data()["price"], json!(25));
        assert_eq!(event.data().len(), 6);
    }

    #[tokio::test]
    async fn test_eventually_reports_timeout() {
        assert!(!eventually(Duration::from_millis(20), || async { false }).await);

        let polls = AtomicUsize::new(0);
        let seen = eventually(Duration::from_secs(1), || {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            async move { n >= 2 }
        })
        .await;
        assert!(seen);
    }
}
