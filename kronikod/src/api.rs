//! HTTP API for the Kroniko daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Raw event writes (optionally guarded) and reads
//! - The demo shopping cart: add item, remove item, clear, list

use axum::{
    extract::{rejection::JsonRejection, Path, Query as Params, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use kroniko_domain::{value_text, AppendCondition, Event, Query, QueryItem, ReadOptions, SequencedEvent, StoredEvent};
use kroniko_eventlog::{EventLogError, EventStore};

use crate::cart::{CartService, CartView};
use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub store: Arc<EventStore>,
    pub carts: CartService,
}

impl ApiState {
    pub fn new(store: Arc<EventStore>, max_cart_items: usize) -> Self {
        Self {
            carts: CartService::new(store.clone(), max_cart_items),
            store,
        }
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub head: u64,
}

/// Request naming one cart.
#[derive(Debug, Deserialize)]
pub struct ClearCartRequest {
    pub cart_id: Value,
}

/// Request naming one item of a cart.
#[derive(Debug, Deserialize)]
pub struct RemoveItemRequest {
    pub cart_id: Value,
    pub item_id: Value,
}

/// Confirmation of a cart command.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub event_id: String,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/events", post(write_events_handler).get(read_events_handler))
        .route("/add_item", post(add_item_handler))
        .route("/remove_item", delete(remove_item_handler))
        .route("/clear_cart", delete(clear_cart_handler))
        .route("/cart/:cart_id/items", get(cart_items_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        head: state.store.head(),
    })
}

/// Append events.
///
/// Accepts a single event, a list of events, or
/// `{"events": [..], "condition": {"fail_if_events_match": [..], "after": n}}`.
async fn write_events_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Vec<StoredEvent>>, ApiError> {
    let Json(body) = payload.map_err(invalid_json)?;
    let (events, condition) = parse_write_request(body).map_err(to_error_response)?;

    let stored = state
        .store
        .write(events, condition)
        .await
        .map_err(|e| to_error_response(e.into()))?;

    Ok(Json(stored))
}

/// Read events.
///
/// `types` is a comma-separated type list; `from`, `backwards` and `limit`
/// set read options; every other parameter is a property match.
async fn read_events_handler(
    State(state): State<Arc<ApiState>>,
    Params(params): Params<BTreeMap<String, String>>,
) -> Result<Json<Vec<SequencedEvent>>, ApiError> {
    let (query, options) = parse_read_params(params).map_err(to_error_response)?;

    let events = state
        .store
        .read(&query, options)
        .await
        .map_err(|e| to_error_response(e.into()))?;

    Ok(Json(events))
}

/// Add an item to a cart.
async fn add_item_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<StoredEvent>, ApiError> {
    let Json(body) = payload.map_err(invalid_json)?;
    let Value::Object(request) = body else {
        return Err(to_error_response(DaemonError::InvalidRequest(
            "Request body must be a JSON object".to_string(),
        )));
    };

    let stored = state
        .carts
        .add_item(&request)
        .await
        .map_err(to_error_response)?;

    Ok(Json(stored))
}

/// Remove an item from a cart.
async fn remove_item_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<RemoveItemRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = payload.map_err(invalid_json)?;

    let stored = state
        .carts
        .remove_item(&value_text(&request.cart_id), &value_text(&request.item_id))
        .await
        .map_err(to_error_response)?;

    Ok(Json(MessageResponse {
        message: "Item removed".to_string(),
        event_id: stored.id.to_string(),
    }))
}

/// Remove every item from a cart.
async fn clear_cart_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<ClearCartRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = payload.map_err(invalid_json)?;

    let stored = state
        .carts
        .clear(&value_text(&request.cart_id))
        .await
        .map_err(to_error_response)?;

    Ok(Json(MessageResponse {
        message: "Cart cleared".to_string(),
        event_id: stored.id.to_string(),
    }))
}

/// List the items of a cart.
async fn cart_items_handler(
    State(state): State<Arc<ApiState>>,
    Path(cart_id): Path<String>,
) -> Result<Json<CartView>, ApiError> {
    let view = state.carts.view(&cart_id).await.map_err(to_error_response)?;
    Ok(Json(view))
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_write_request(body: Value) -> DaemonResult<(Vec<Event>, Option<AppendCondition>)> {
    match body {
        Value::Array(items) => Ok((parse_events(items)?, None)),
        Value::Object(mut doc) => match doc.shift_remove("events") {
            Some(events) => {
                let condition = match doc.shift_remove("condition") {
                    None | Some(Value::Null) => None,
                    Some(raw) => Some(serde_json::from_value(raw).map_err(|e| {
                        DaemonError::InvalidRequest(format!("Invalid condition: {}", e))
                    })?),
                };
                let items = match events {
                    Value::Array(items) => items,
                    single => vec![single],
                };
                Ok((parse_events(items)?, condition))
            }
            None => Ok((vec![Event::from_json(Value::Object(doc))?], None)),
        },
        _ => Err(DaemonError::InvalidRequest(
            "Expected an event, a list of events or an events envelope".to_string(),
        )),
    }
}

fn parse_events(items: Vec<Value>) -> DaemonResult<Vec<Event>> {
    items
        .into_iter()
        .map(|item| Event::from_json(item).map_err(DaemonError::from))
        .collect()
}

fn parse_read_params(params: BTreeMap<String, String>) -> DaemonResult<(Query, ReadOptions)> {
    let mut options = ReadOptions::new();
    let mut item = QueryItem::new();
    let mut filtered = false;

    for (key, value) in params {
        match key.as_str() {
            "types" => {
                let types: Vec<&str> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect();
                if !types.is_empty() {
                    item = item.types(types);
                    filtered = true;
                }
            }
            "from" => options = options.from(parse_param(&key, &value)?),
            "limit" => options = options.limit(parse_param(&key, &value)?),
            "backwards" => {
                if parse_param::<bool>(&key, &value)? {
                    options = options.backwards();
                }
            }
            _ => {
                item = item.property(key, value);
                filtered = true;
            }
        }
    }

    let query = if filtered { Query::item(item) } else { Query::all() };
    Ok((query, options))
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> DaemonResult<T> {
    value
        .parse()
        .map_err(|_| DaemonError::InvalidRequest(format!("Invalid {} parameter: {}", key, value)))
}

fn invalid_json(rejection: JsonRejection) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: format!("Invalid JSON payload: {}", rejection.body_text()),
        }),
    )
}

fn to_error_response(error: DaemonError) -> ApiError {
    let status = match &error {
        DaemonError::InvalidRequest(_) | DaemonError::Domain(_) | DaemonError::CartFull { .. } => {
            StatusCode::BAD_REQUEST
        }
        DaemonError::ItemNotFound { .. } => StatusCode::NOT_FOUND,
        DaemonError::EventLog(e) if e.is_conflict() => StatusCode::CONFLICT,
        DaemonError::EventLog(EventLogError::Validation(_)) => StatusCode::BAD_REQUEST,
        DaemonError::EventLog(_) | DaemonError::Io(_) | DaemonError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    if status.is_server_error() {
        error!(error = %error, "Request failed");
    }

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_write_request_forms() {
        let (events, condition) =
            parse_write_request(json!({"type": "ItemAdded", "cart_id": "1"})).unwrap();
        assert_eq!(events.len(), 1);
        assert!(condition.is_none());

        let (events, _) = parse_write_request(json!([
            {"type": "ItemAdded", "data": {"cart_id": "1"}},
            {"type": "CartCleared", "cart_id": "1"}
        ]))
        .unwrap();
        assert_eq!(events.len(), 2);

        let (events, condition) = parse_write_request(json!({
            "events": [{"type": "ItemAdded", "cart_id": "1"}],
            "condition": {
                "fail_if_events_match": [{"types": ["ItemAdded"], "properties": {"cart_id": "1"}}],
                "after": 4
            }
        }))
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(condition.unwrap().after, Some(4));
    }

    #[test]
    fn test_write_request_rejects_bad_input() {
        assert!(matches!(
            parse_write_request(json!("ItemAdded")),
            Err(DaemonError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_write_request(json!({"cart_id": "1"})),
            Err(DaemonError::Domain(_))
        ));
        assert!(matches!(
            parse_write_request(json!({"events": [], "condition": {"after": "x"}})),
            Err(DaemonError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_read_params() {
        let (query, options) = parse_read_params(params(&[])).unwrap();
        assert!(query.is_all());
        assert_eq!(options, ReadOptions::new());

        let (query, options) = parse_read_params(params(&[
            ("types", "ItemAdded, ItemRemoved"),
            ("cart_id", "42"),
            ("from", "3"),
            ("backwards", "true"),
            ("limit", "2"),
        ]))
        .unwrap();
        assert_eq!(
            query,
            Query::item(
                QueryItem::new()
                    .property("cart_id", "42")
                    .types(["ItemAdded", "ItemRemoved"])
            )
        );
        assert_eq!(options, ReadOptions::new().from(3).backwards().limit(2));

        assert!(parse_read_params(params(&[("from", "soon")])).is_err());
    }

    #[test]
    fn test_error_status_mapping() {
        let conflict = DaemonError::EventLog(EventLogError::AppendConditionFailed {
            after: Some(1),
            matches: 1,
        });
        assert_eq!(to_error_response(conflict).0, StatusCode::CONFLICT);

        let not_found = DaemonError::ItemNotFound {
            cart_id: "1".to_string(),
            item_id: "2".to_string(),
        };
        assert_eq!(to_error_response(not_found).0, StatusCode::NOT_FOUND);

        let timeout = DaemonError::EventLog(EventLogError::LockAcquisitionFailed {
            key: "k".to_string(),
            attempts: 5,
        });
        assert_eq!(
            to_error_response(timeout).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let full = DaemonError::CartFull {
            cart_id: "1".to_string(),
            max: 3,
        };
        let (status, Json(body)) = to_error_response(full);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "Cart cannot have more than 3 items");
    }
}
