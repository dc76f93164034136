//! `GET /health` (spec §4.8/§6.5): OK iff the Pub/Sub Bus is reachable and
//! the Match Store responds to a trivial query, both within 500ms.

use crate::api_error::ApiError;
use crate::pubsub::PubSubBus;
use crate::store::{MatchStore, StoreError};
use actix_web::{web, HttpResponse, Result};
use std::sync::Arc;
use std::time::Duration;

const HEALTH_CHECK_DEADLINE: Duration = Duration::from_millis(500);
const HEALTH_CHECK_TOPIC: &str = "health:probe";
const HEALTH_CHECK_MATCH_ID: &str = "health-check-sentinel";

pub async fn health_check(
    bus: web::Data<Arc<dyn PubSubBus>>,
    store: web::Data<Arc<dyn MatchStore>>,
) -> Result<HttpResponse, ApiError> {
    let bus_ok = tokio::time::timeout(HEALTH_CHECK_DEADLINE, bus.publish(HEALTH_CHECK_TOPIC, Vec::new()))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

    // A `NotFound` answer still means the store round-tripped in time; only
    // a timeout or a real connection failure marks it down.
    let store_ok = match tokio::time::timeout(HEALTH_CHECK_DEADLINE, store.load_match(HEALTH_CHECK_MATCH_ID)).await {
        Ok(Ok(_)) | Ok(Err(StoreError::NotFound)) => true,
        Ok(Err(_)) | Err(_) => false,
    };

    if !bus_ok || !store_ok {
        return Err(ApiError::ServiceUnavailable(format!(
            "pubsub_ok={bus_ok} store_ok={store_ok}"
        )));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "pubsub": "reachable",
        "store": "reachable",
        "timestamp": chrono::Utc::now(),
    })))
}
