//! HTTP-to-WebSocket upgrade handlers (spec §6.1):
//! `GET /api/v1/ws/match/{matchId}?token=…&role=referee|viewer`
//! `GET /api/v1/ws/tournament/{tournamentId}?token=…`
//!
//! Auth failures never reject the plain-HTTP upgrade: a browser's
//! `new WebSocket` can't read a rejected response's status or headers, only
//! its `onclose` code, which is exactly why the spec routes the bearer token
//! through `?token=` in the first place. So the upgrade always completes and
//! `MatchConnection::started` closes with 4401/4403 itself.

use crate::auth::{AuthContext, TokenVerifier, TokenVerifierError};
use crate::hub::connection::{ConnectionAuth, MatchConnection, WsConfig};
use crate::hub::Hub;
use crate::models::match_model::ChannelId;
use crate::models::RequestedRole;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct WsAppState {
    pub hub: Arc<Hub>,
    pub token_verifier: Arc<TokenVerifier>,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    pub queue_capacity: usize,
    pub send_timeout: Duration,
}

impl WsAppState {
    fn config(&self) -> WsConfig {
        WsConfig {
            ping_interval: self.ping_interval,
            idle_timeout: self.idle_timeout,
            queue_capacity: self.queue_capacity,
            send_timeout: self.send_timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
    role: Option<String>,
    #[serde(rename = "sinceVersion")]
    since_version: Option<i64>,
}

/// Resolves a query-string token (and, on match channels, the requested
/// role) into a `ConnectionAuth`, never an HTTP-level rejection.
fn authenticate(state: &WsAppState, query: &WsQuery, requested_role: Option<RequestedRole>) -> ConnectionAuth {
    let Some(token) = &query.token else {
        return ConnectionAuth::Unauthenticated;
    };

    let ctx: AuthContext = match state.token_verifier.verify(token, Utc::now()) {
        Ok(ctx) => ctx,
        Err(TokenVerifierError::Expired)
        | Err(TokenVerifierError::BadSignature)
        | Err(TokenVerifierError::Malformed)
        | Err(TokenVerifierError::UnknownIssuer) => return ConnectionAuth::Unauthenticated,
    };

    if let Some(RequestedRole::Referee) = requested_role {
        if !ctx.can_mutate() {
            return ConnectionAuth::Forbidden;
        }
    }

    ConnectionAuth::Accepted {
        subject_id: ctx.subject_id,
        roles: ctx.roles,
    }
}

pub async fn match_ws(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    query: web::Query<WsQuery>,
    state: web::Data<WsAppState>,
) -> Result<HttpResponse, Error> {
    let match_id = path.into_inner();
    let requested_role = Some(RequestedRole::parse(query.role.as_deref()));
    let auth = authenticate(&state, &query, requested_role);

    let connection_id = state.hub.next_connection_id();
    let connection = MatchConnection::new(
        connection_id,
        auth,
        ChannelId::Match(match_id),
        state.hub.clone(),
        state.config(),
        query.since_version,
    );

    ws::start(connection, &req, stream)
}

pub async fn tournament_ws(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    query: web::Query<WsQuery>,
    state: web::Data<WsAppState>,
) -> Result<HttpResponse, Error> {
    let tournament_id = path.into_inner();
    let auth = authenticate(&state, &query, None);

    let connection_id = state.hub.next_connection_id();
    let connection = MatchConnection::new(
        connection_id,
        auth,
        ChannelId::Tournament(tournament_id),
        state.hub.clone(),
        state.config(),
        None,
    );

    ws::start(connection, &req, stream)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/ws/match/{matchId}", web::get().to(match_ws))
        .route("/api/v1/ws/tournament/{tournamentId}", web::get().to(tournament_ws));
}
