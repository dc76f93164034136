//! Process-wide observability surface (spec §4.8). A single `Metrics`
//! registers every counter/gauge/histogram named in the spec and is shared
//! behind `web::Data<Metrics>`/`Arc<Metrics>` across the Hub, Router, and
//! Dispatcher. Grounded in the wider example pack's use of the `prometheus`
//! crate; the teacher itself carries no metrics dependency.

use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry,
};

pub struct Metrics {
    pub registry: Registry,
    pub current_ws_connections: IntGauge,
    pub pubsub_backlog: IntGauge,
    pub broadcast_latency_ms: Histogram,
    pub ws_messages_published: IntCounterVec,
    pub ws_messages_broadcasted: IntCounterVec,
    pub commands_accepted_total: IntCounterVec,
    pub commands_rejected_total: IntCounterVec,
    pub auto_finish_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let current_ws_connections =
            IntGauge::new("current_ws_connections", "Live WebSocket connections on this process").unwrap();
        let pubsub_backlog = IntGauge::new(
            "pubsub_backlog",
            "Pub/Sub backlog length summed across channels this process tracks",
        )
        .unwrap();
        let broadcast_latency_ms = Histogram::with_opts(
            HistogramOpts::new(
                "broadcast_latency_ms",
                "Time from bus publish to local connection delivery, in milliseconds",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
        )
        .unwrap();
        let ws_messages_published =
            IntCounterVec::new(Opts::new("ws_messages_published", "Frames published to the bus"), &["channel"]).unwrap();
        let ws_messages_broadcasted = IntCounterVec::new(
            Opts::new("ws_messages_broadcasted", "Frames delivered to local connections"),
            &["channel"],
        )
        .unwrap();
        let commands_accepted_total = IntCounterVec::new(
            Opts::new("commands_accepted_total", "Commands accepted by the engine"),
            &["kind"],
        )
        .unwrap();
        let commands_rejected_total = IntCounterVec::new(
            Opts::new("commands_rejected_total", "Commands rejected before or by the engine"),
            &["reason"],
        )
        .unwrap();
        let auto_finish_total = IntCounterVec::new(
            Opts::new("auto_finish_total", "Engine-initiated finishes"),
            &["cause"],
        )
        .unwrap();

        registry.register(Box::new(current_ws_connections.clone())).unwrap();
        registry.register(Box::new(pubsub_backlog.clone())).unwrap();
        registry.register(Box::new(broadcast_latency_ms.clone())).unwrap();
        registry.register(Box::new(ws_messages_published.clone())).unwrap();
        registry.register(Box::new(ws_messages_broadcasted.clone())).unwrap();
        registry.register(Box::new(commands_accepted_total.clone())).unwrap();
        registry.register(Box::new(commands_rejected_total.clone())).unwrap();
        registry.register(Box::new(auto_finish_total.clone())).unwrap();

        Self {
            registry,
            current_ws_connections,
            pubsub_backlog,
            broadcast_latency_ms,
            ws_messages_published,
            ws_messages_broadcasted,
            commands_accepted_total,
            commands_rejected_total,
            auto_finish_total,
        }
    }

    pub fn render(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf).expect("prometheus encoding never fails");
        String::from_utf8(buf).expect("prometheus text output is always utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
