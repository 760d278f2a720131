use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub booking_transitions_total: IntCounterVec,
    pub notifications_published_total: IntCounterVec,
    pub notifications_dropped_total: IntCounter,
    pub live_connections: IntGauge,
    pub otp_issued_total: IntCounterVec,
    pub otp_verifications_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let booking_transitions_total = IntCounterVec::new(
            Opts::new(
                "booking_transitions_total",
                "Booking lifecycle events by event and outcome",
            ),
            &["event", "outcome"],
        )
        .expect("valid booking_transitions_total metric");

        let notifications_published_total = IntCounterVec::new(
            Opts::new(
                "notifications_published_total",
                "Events handed to live connections, by event name",
            ),
            &["event"],
        )
        .expect("valid notifications_published_total metric");

        let notifications_dropped_total = IntCounter::new(
            "notifications_dropped_total",
            "Events dropped because a connection buffer was full or closed",
        )
        .expect("valid notifications_dropped_total metric");

        let live_connections = IntGauge::new("live_connections", "Open realtime connections")
            .expect("valid live_connections metric");

        let otp_issued_total = IntCounterVec::new(
            Opts::new("otp_issued_total", "One-time codes issued by purpose"),
            &["purpose", "delivered"],
        )
        .expect("valid otp_issued_total metric");

        let otp_verifications_total = IntCounterVec::new(
            Opts::new(
                "otp_verifications_total",
                "One-time code verifications by purpose and outcome",
            ),
            &["purpose", "outcome"],
        )
        .expect("valid otp_verifications_total metric");

        registry
            .register(Box::new(booking_transitions_total.clone()))
            .expect("register booking_transitions_total");
        registry
            .register(Box::new(notifications_published_total.clone()))
            .expect("register notifications_published_total");
        registry
            .register(Box::new(notifications_dropped_total.clone()))
            .expect("register notifications_dropped_total");
        registry
            .register(Box::new(live_connections.clone()))
            .expect("register live_connections");
        registry
            .register(Box::new(otp_issued_total.clone()))
            .expect("register otp_issued_total");
        registry
            .register(Box::new(otp_verifications_total.clone()))
            .expect("register otp_verifications_total");

        Self {
            registry,
            booking_transitions_total,
            notifications_published_total,
            notifications_dropped_total,
            live_connections,
            otp_issued_total,
            otp_verifications_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
