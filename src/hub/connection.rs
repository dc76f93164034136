//! One actor per live WebSocket connection (spec §4.6). `StreamHandler`
//! drives the receive side; `Handler<Outbound>` drives the bounded send
//! side — the registry enforces the queue bound before a frame ever reaches
//! this actor, so by the time `Outbound::Frame` arrives it is always safe to
//! write.

use crate::engine::Rejection;
use crate::hub::registry::ConnectionHandle;
use crate::hub::Hub;
use crate::models::match_model::ChannelId;
use crate::models::Role;
use crate::router::CommandError;
use crate::ws::frame::{parse_command, ClientFrame, ServerFrame};
use actix::{Actor, ActorContext, ActorFutureExt, Addr, AsyncContext, Handler, Message, Running, StreamHandler, WrapFuture};
use actix_web_actors::ws;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Message)]
#[rtype(result = "()")]
pub enum Outbound {
    Frame(String),
    Evict(EvictReason),
}

#[derive(Debug, Clone, Copy)]
pub enum EvictReason {
    Idle,
    SlowConsumer,
}

impl EvictReason {
    fn close_code(self) -> u16 {
        match self {
            EvictReason::Idle => 4000,
            EvictReason::SlowConsumer => 1013,
        }
    }

    fn description(self) -> &'static str {
        match self {
            EvictReason::Idle => "idle",
            EvictReason::SlowConsumer => "slow_consumer",
        }
    }
}

pub struct WsConfig {
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    pub queue_capacity: usize,
    pub send_timeout: Duration,
}

/// The outcome of handshake-time authentication/authorization (spec §4.1,
/// §4.6), decided by `ws::routes` before the actor is constructed. Kept as
/// data rather than rejecting the upgrade outright so the close code the
/// client observes is the WS-level 4401/4403 the spec names, not a bare
/// HTTP status a browser `WebSocket` can't read anyway.
pub enum ConnectionAuth {
    Accepted { subject_id: String, roles: HashSet<Role> },
    Unauthenticated,
    Forbidden,
}

/// The actix actor backing one `/ws/match/{id}` or `/ws/tournament/{id}`
/// socket. Registration with the Hub happens in `started`, deregistration in
/// `stopped`, so the connection's resources are released even on abnormal
/// termination (spec §3 Lifecycle).
pub struct MatchConnection {
    id: u64,
    auth: ConnectionAuth,
    channel: ChannelId,
    hub: Arc<Hub>,
    config: WsConfig,
    queue_len: Arc<AtomicUsize>,
    oldest_pending_millis: Arc<AtomicU64>,
    last_heartbeat: Instant,
    since_version: Option<i64>,
}

impl MatchConnection {
    pub fn new(
        id: u64,
        auth: ConnectionAuth,
        channel: ChannelId,
        hub: Arc<Hub>,
        config: WsConfig,
        since_version: Option<i64>,
    ) -> Self {
        Self {
            id,
            auth,
            channel,
            hub,
            config,
            queue_len: Arc::new(AtomicUsize::new(0)),
            oldest_pending_millis: Arc::new(AtomicU64::new(0)),
            last_heartbeat: Instant::now(),
            since_version,
        }
    }

    fn subject_id(&self) -> &str {
        match &self.auth {
            ConnectionAuth::Accepted { subject_id, .. } => subject_id,
            _ => "unknown",
        }
    }

    fn roles(&self) -> &HashSet<Role> {
        static EMPTY: std::sync::OnceLock<HashSet<Role>> = std::sync::OnceLock::new();
        match &self.auth {
            ConnectionAuth::Accepted { roles, .. } => roles,
            _ => EMPTY.get_or_init(HashSet::new),
        }
    }

    fn can_mutate(&self) -> bool {
        self.roles().iter().any(|r| r.can_mutate())
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = self.config.ping_interval;
        ctx.run_interval(interval, |act, ctx| {
            if act.last_heartbeat.elapsed() > act.config.idle_timeout {
                info!(connection_id = act.id, "evicting idle connection");
                act.close(ctx, EvictReason::Idle);
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn close(&self, ctx: &mut ws::WebsocketContext<Self>, reason: EvictReason) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Other(reason.close_code()),
            description: Some(reason.description().to_string()),
        }));
        ctx.stop();
    }

    /// Closes immediately with a handshake-time policy code, skipping Hub
    /// registration entirely — used for `ConnectionAuth::Unauthenticated`/
    /// `Forbidden` (spec §6.1 close codes 4401, 4403).
    fn close_unjoined(&self, ctx: &mut ws::WebsocketContext<Self>, code: u16, description: &'static str) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Other(code),
            description: Some(description.to_string()),
        }));
        ctx.stop();
    }
}

impl Actor for MatchConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        match &self.auth {
            ConnectionAuth::Unauthenticated => {
                warn!(connection_id = self.id, "rejecting handshake: unauthenticated");
                self.close_unjoined(ctx, 4401, "unauthenticated");
                return;
            }
            ConnectionAuth::Forbidden => {
                warn!(connection_id = self.id, "rejecting handshake: forbidden role request");
                self.close_unjoined(ctx, 4403, "forbidden");
                return;
            }
            ConnectionAuth::Accepted { .. } => {}
        }

        self.heartbeat(ctx);

        let handle = ConnectionHandle {
            recipient: ctx.address().recipient(),
            queue_len: self.queue_len.clone(),
            queue_capacity: self.config.queue_capacity,
            oldest_pending_millis: self.oldest_pending_millis.clone(),
            send_timeout: self.config.send_timeout,
        };
        let hub = self.hub.clone();
        let id = self.id;
        let channel = self.channel.clone();
        let since_version = self.since_version;
        let addr: Addr<Self> = ctx.address();

        let fut = async move {
            hub.join(id, channel.clone(), handle).await;
            if let Some(since) = since_version {
                hub.send_resume_backlog(&channel, since, addr).await;
            }
        };
        ctx.spawn(fut.into_actor(self));

        info!(connection_id = self.id, subject_id = self.subject_id(), channel = %self.channel, "connection opened");
    }

    fn stopping(&mut self, _ctx: &mut Self::Context) -> Running {
        if matches!(self.auth, ConnectionAuth::Accepted { .. }) {
            let hub = self.hub.clone();
            let id = self.id;
            let channel = self.channel.clone();
            actix::spawn(async move {
                hub.leave(id, &channel).await;
            });
        }
        Running::Stop
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection_id = self.id, "connection closed");
    }
}

impl Handler<Outbound> for MatchConnection {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Frame(payload) => {
                let prev_len = self.queue_len.fetch_sub(1, Ordering::AcqRel);
                if prev_len <= 1 {
                    self.oldest_pending_millis.store(0, Ordering::Release);
                }
                ctx.text(payload);
            }
            Outbound::Evict(reason) => self.close(ctx, reason),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MatchConnection {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match item {
            Ok(m) => m,
            Err(e) => {
                warn!(connection_id = self.id, error = %e, "websocket protocol error");
                ctx.stop();
                return;
            }
        };

        match msg {
            ws::Message::Ping(bytes) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&bytes);
            }
            ws::Message::Pong(_) => {
                self.last_heartbeat = Instant::now();
            }
            ws::Message::Text(text) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            ws::Message::Binary(_) => {
                self.last_heartbeat = Instant::now();
            }
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) | ws::Message::Nop => {}
        }
    }
}

impl MatchConnection {
    fn handle_text(&self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let now = Utc::now();
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(_) => {
                ctx.text(
                    ServerFrame::error("MalformedCommand", "invalid frame shape", None, now).to_json(),
                );
                return;
            }
        };

        let correlation_id = frame.correlation_id.clone();

        let command = match parse_command(&frame) {
            Ok(None) => {
                ctx.text(ServerFrame::pong(now).to_json());
                return;
            }
            Ok(Some(cmd)) => cmd,
            Err(Rejection::MalformedCommand) => {
                ctx.text(ServerFrame::error("MalformedCommand", "unrecognized command shape", correlation_id, now).to_json());
                return;
            }
            Err(_) => unreachable!("parse_command only returns MalformedCommand"),
        };

        let ChannelId::Match(match_id) = &self.channel else {
            ctx.text(ServerFrame::error("Unauthorized", "commands are only valid on a match channel", correlation_id, now).to_json());
            return;
        };

        if !self.can_mutate() {
            ctx.text(ServerFrame::error("Unauthorized", "viewer connections may not mutate", correlation_id, now).to_json());
            return;
        }

        let hub = self.hub.clone();
        let match_id = match_id.clone();
        let actor_id = self.subject_id().to_string();
        let actor_roles = self.roles().clone();
        let fut = async move { hub.route_command(&match_id, command, &actor_id, &actor_roles, now).await };

        ctx.spawn(fut.into_actor(self).map(move |result, _act, ctx| {
            if let Err(e) = result {
                let kind = command_error_kind(&e);
                ctx.text(ServerFrame::error(kind, e.to_string(), correlation_id, Utc::now()).to_json());
            }
        }));
    }
}

fn command_error_kind(e: &CommandError) -> &'static str {
    e.frame_kind()
}
