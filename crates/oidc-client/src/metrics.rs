//! Client-side metrics
//!
//! Emitted through the `metrics` facade; hosts decide whether a recorder is
//! installed. Without one every call is a no-op.
//!
//! - `oauth_grant_requests_total` (counter): labels `grant`, `outcome`
//! - `oauth_token_refreshes_total` (counter): label `trigger`

/// Outcome label for a grant call that got a usable response.
pub const OUTCOME_SUCCESS: &str = "success";
/// Outcome label for a grant call that failed at the transport.
pub const OUTCOME_ERROR: &str = "error";
/// Outcome label for a grant call skipped on a missing precondition.
pub const OUTCOME_SKIPPED: &str = "skipped";

/// Record one grant function invocation.
pub fn record_grant(grant: &'static str, outcome: &'static str) {
    metrics::counter!("oauth_grant_requests_total", "grant" => grant, "outcome" => outcome)
        .increment(1);
}

/// Record a refresh attempt of an expired token.
pub fn record_refresh(trigger: &'static str) {
    metrics::counter!("oauth_token_refreshes_total", "trigger" => trigger).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_grant("refresh_token", OUTCOME_SKIPPED);
        record_refresh("watcher");
    }

    #[test]
    fn grant_counter_renders_with_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_grant("client_credentials", OUTCOME_SUCCESS);
            record_grant("client_credentials", OUTCOME_SUCCESS);
            record_refresh("interceptor");
        });

        let rendered = handle.render();
        assert!(
            rendered.contains("oauth_grant_requests_total"),
            "missing grant counter: {rendered}"
        );
        assert!(rendered.contains(r#"grant="client_credentials""#));
        assert!(rendered.contains(r#"outcome="success""#));
        assert!(rendered.contains(r#"trigger="interceptor""#));
    }
}
