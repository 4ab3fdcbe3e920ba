//! Prometheus metrics for operational visibility.
//!
//! # Security Considerations
//!
//! All metrics are safe for exposure:
//! - No tokens, key material, or request bodies
//! - No subjects or emails
//! - Only aggregate counts and operational statistics

use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// All metrics for hearthguard.
#[derive(Clone)]
pub struct Metrics {
    /// The Prometheus registry containing all metrics.
    pub registry: Registry,

    // === Envelope Metrics ===
    /// Total number of envelopes sealed.
    pub envelopes_sealed_total: IntCounter,

    /// Total number of envelopes opened.
    pub envelopes_opened_total: IntCounter,

    /// Total number of envelope failures (by stage).
    pub envelope_failures_total: IntCounterVec,

    /// Total number of flagged requests sent without encryption.
    pub encryption_fallbacks_total: IntCounter,

    // === Key Metrics ===
    /// Total number of public key fetches (by outcome).
    pub key_fetches_total: IntCounterVec,

    /// Total number of public key lookups served from cache.
    pub key_cache_hits_total: IntCounter,

    /// Number of private keys loaded by the key service.
    pub keys_loaded: IntGauge,

    // === Token Metrics ===
    /// Total number of token checks (by result).
    pub token_checks_total: IntCounterVec,

    /// Total number of refresh attempts (by outcome).
    pub token_refreshes_total: IntCounterVec,

    // === Server Metrics ===
    /// Total number of HTTP requests handled (by route and status).
    pub http_requests_total: IntCounterVec,

    /// Timestamp when the server started (Unix seconds).
    pub server_start_time_seconds: Gauge,

    /// Server version information.
    pub server_info: IntGaugeVec,
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let envelopes_sealed_total = IntCounter::with_opts(Opts::new(
            "hearthguard_envelopes_sealed_total",
            "Total number of request envelopes sealed",
        ))?;
        registry.register(Box::new(envelopes_sealed_total.clone()))?;

        let envelopes_opened_total = IntCounter::with_opts(Opts::new(
            "hearthguard_envelopes_opened_total",
            "Total number of request envelopes opened",
        ))?;
        registry.register(Box::new(envelopes_opened_total.clone()))?;

        let envelope_failures_total = IntCounterVec::new(
            Opts::new(
                "hearthguard_envelope_failures_total",
                "Total number of envelope failures",
            ),
            &["stage"],
        )?;
        registry.register(Box::new(envelope_failures_total.clone()))?;

        let encryption_fallbacks_total = IntCounter::with_opts(Opts::new(
            "hearthguard_encryption_fallbacks_total",
            "Total number of flagged requests sent unencrypted after a failure",
        ))?;
        registry.register(Box::new(encryption_fallbacks_total.clone()))?;

        let key_fetches_total = IntCounterVec::new(
            Opts::new(
                "hearthguard_key_fetches_total",
                "Total number of public key fetches",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(key_fetches_total.clone()))?;

        let key_cache_hits_total = IntCounter::with_opts(Opts::new(
            "hearthguard_key_cache_hits_total",
            "Total number of public key lookups served from cache",
        ))?;
        registry.register(Box::new(key_cache_hits_total.clone()))?;

        let keys_loaded = IntGauge::with_opts(Opts::new(
            "hearthguard_keys_loaded",
            "Number of private keys loaded by the key service",
        ))?;
        registry.register(Box::new(keys_loaded.clone()))?;

        let token_checks_total = IntCounterVec::new(
            Opts::new(
                "hearthguard_token_checks_total",
                "Total number of access token checks",
            ),
            &["result"],
        )?;
        registry.register(Box::new(token_checks_total.clone()))?;

        let token_refreshes_total = IntCounterVec::new(
            Opts::new(
                "hearthguard_token_refreshes_total",
                "Total number of access token refresh attempts",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(token_refreshes_total.clone()))?;

        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "hearthguard_http_requests_total",
                "Total number of HTTP requests handled",
            ),
            &["route", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let server_start_time_seconds = Gauge::with_opts(Opts::new(
            "hearthguard_server_start_time_seconds",
            "Unix timestamp when the server started",
        ))?;
        registry.register(Box::new(server_start_time_seconds.clone()))?;

        let server_info = IntGaugeVec::new(
            Opts::new("hearthguard_server_info", "Server version information"),
            &["version"],
        )?;
        registry.register(Box::new(server_info.clone()))?;

        Ok(Self {
            registry,
            envelopes_sealed_total,
            envelopes_opened_total,
            envelope_failures_total,
            encryption_fallbacks_total,
            key_fetches_total,
            key_cache_hits_total,
            keys_loaded,
            token_checks_total,
            token_refreshes_total,
            http_requests_total,
            server_start_time_seconds,
            server_info,
        })
    }

    /// Initialize server info and start time.
    pub fn init_server_info(&self, version: &str) {
        self.server_info.with_label_values(&[version]).set(1);

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.server_start_time_seconds.set(now);
    }

    /// Record a sealed envelope.
    pub fn record_envelope_sealed(&self) {
        self.envelopes_sealed_total.inc();
    }

    /// Record an opened envelope.
    pub fn record_envelope_opened(&self) {
        self.envelopes_opened_total.inc();
    }

    /// Record an envelope failure.
    ///
    /// `stage` should be "seal" or "open".
    pub fn record_envelope_failure(&self, stage: &str) {
        self.envelope_failures_total
            .with_label_values(&[stage])
            .inc();
    }

    /// Record a flagged request sent in plaintext.
    pub fn record_encryption_fallback(&self) {
        self.encryption_fallbacks_total.inc();
    }

    /// Record a public key fetch.
    ///
    /// `outcome` should be "success" or "error".
    pub fn record_key_fetch(&self, outcome: &str) {
        self.key_fetches_total.with_label_values(&[outcome]).inc();
    }

    /// Record a key cache hit.
    pub fn record_key_cache_hit(&self) {
        self.key_cache_hits_total.inc();
    }

    /// Update the number of loaded private keys.
    pub fn set_keys_loaded(&self, count: usize) {
        self.keys_loaded.set(count as i64);
    }

    /// Record a token check.
    ///
    /// `result` should be "valid", "expired", or "missing".
    pub fn record_token_check(&self, result: &str) {
        self.token_checks_total.with_label_values(&[result]).inc();
    }

    /// Record a refresh attempt.
    ///
    /// `outcome` should be "success", "failed", or "unavailable".
    pub fn record_token_refresh(&self, outcome: &str) {
        self.token_refreshes_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a handled HTTP request.
    pub fn record_http_request(&self, route: &str, status: u16) {
        self.http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Gather all metrics for export.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics")
    }
}
