//! Receptor de webhooks do integrador.
//!
//! Os dois endpoints respondem sempre 200: um corpo inválido ou um pedido
//! desconhecido apenas geram log.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::model::Order;
use crate::state_machine::OrderStatus;
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct Hook {
    #[serde(default)]
    order_number: Option<serde_json::Value>,
    #[serde(default)]
    id: Option<serde_json::Value>,
}

impl Hook {
    fn keys(&self) -> Option<(i64, i64)> {
        Some((as_i64(self.order_number.as_ref()?)?, as_i64(self.id.as_ref()?)?))
    }
}

fn as_i64(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

pub fn router(store: Arc<dyn Store>) -> Router {
    Router::new()
        .route("/receiver/hooks", post(cancel))
        .route("/receiver/hooks/processed", post(processed))
        .with_state(store)
}

fn lookup(store: &dyn Store, body: &[u8]) -> Option<Order> {
    let hook: Hook = match serde_json::from_slice(body) {
        Ok(hook) => hook,
        Err(e) => {
            warn!("invalid webhook body: {e}");
            return None;
        }
    };
    let (number, integrator_id) = hook.keys()?;
    match store.find_by_integrator(number, integrator_id, None) {
        Ok(Some(order)) => Some(order),
        Ok(None) => {
            debug!(number, integrator_id, "webhook for unknown order");
            None
        }
        Err(e) => {
            warn!(number, integrator_id, "webhook lookup failed: {e}");
            None
        }
    }
}

async fn cancel(State(store): State<Arc<dyn Store>>, body: Bytes) -> StatusCode {
    if let Some(order) = lookup(store.as_ref(), &body) {
        match store.update_status(&[order.id], OrderStatus::Cancelled) {
            Ok(_) => info!(order = %order, "order cancelled by integrator"),
            Err(e) => warn!(order = %order, "could not cancel order: {e}"),
        }
    }
    StatusCode::OK
}

async fn processed(State(store): State<Arc<dyn Store>>, body: Bytes) -> StatusCode {
    if let Some(order) = lookup(store.as_ref(), &body) {
        match store.set_processed(order.id) {
            Ok(()) => info!(order = %order, "order processed by integrator"),
            Err(e) => warn!(order = %order, "could not mark order processed: {e}"),
        }
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::model::NewConfiguration;
    use crate::store::MemoryStore;

    fn store_with_order() -> (Arc<MemoryStore>, Order) {
        let store = Arc::new(MemoryStore::new());
        let configuration = store
            .add_configuration(NewConfiguration {
                name: "loja".into(),
                days: 3,
                ..Default::default()
            })
            .unwrap();
        let mut candidate = Order::new(&configuration, 10);
        candidate.number = Some(1001);
        let (mut order, _) = store.get_or_create_order(candidate).unwrap();
        order.integrator_id = Some(31);
        store.save_order(&mut order).unwrap();
        (store, order)
    }

    async fn post_hook(store: Arc<MemoryStore>, uri: &str, body: &str) -> StatusCode {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        router(store).oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn cancel_hook_cancels_order() {
        let (store, order) = store_with_order();
        let status = post_hook(store.clone(), "/receiver/hooks", r#"{"order_number": 1001, "id": 31}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert!(store.order(order.id).unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn processed_hook_accepts_string_keys() {
        let (store, order) = store_with_order();
        let status = post_hook(
            store.clone(),
            "/receiver/hooks/processed",
            r#"{"order_number": "1001", "id": "31"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let stored = store.order(order.id).unwrap();
        assert!(stored.processed);
        assert!(!stored.is_cancelled());
    }

    #[tokio::test]
    async fn unknown_order_is_ignored() {
        let (store, order) = store_with_order();
        let status = post_hook(store.clone(), "/receiver/hooks", r#"{"order_number": 1001, "id": 99}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!store.order(order.id).unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn malformed_body_still_answers_ok() {
        let (store, _) = store_with_order();
        assert_eq!(post_hook(store.clone(), "/receiver/hooks", "not json").await, StatusCode::OK);
        assert_eq!(post_hook(store, "/receiver/hooks/processed", "{}").await, StatusCode::OK);
    }
}
