//! `GET /metrics` (spec §4.8): the Prometheus text-exposition scrape
//! endpoint.

use crate::metrics::Metrics;
use actix_web::{web, HttpResponse};
use std::sync::Arc;

pub async fn metrics_handler(metrics: web::Data<Arc<Metrics>>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics.render())
}
