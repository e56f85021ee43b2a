use lazy_static::lazy_static;
use log::{debug, warn};
use prometheus::{labels, register_gauge, Gauge};

use ssl_inspector::DiagnosticResult;

lazy_static! {
    static ref SSL_INSPECTOR_VALID: Gauge = register_gauge!(
        "ssl_inspector_valid",
        "1 when a client would accept the endpoint's certificate chain"
    )
    .expect("metric can be registered");
    static ref SSL_INSPECTOR_FINDINGS: Gauge = register_gauge!(
        "ssl_inspector_findings",
        "number of certificate problems found"
    )
    .expect("metric can be registered");
}

/// Pushes one group of gauges per diagnosed endpoint.
/// # Arguments
/// * `results` - Diagnostic results of the endpoints that produced a verdict
/// * `prometheus_address` - Push gateway base address
pub fn prometheus_metrics(results: &[DiagnosticResult], prometheus_address: &str) {
    for result in results {
        SSL_INSPECTOR_VALID.set(if result.valid { 1.0 } else { 0.0 });
        SSL_INSPECTOR_FINDINGS.set(result.messages.len() as f64);

        let metric_families = prometheus::gather();
        let pushed = prometheus::push_metrics(
            "ssl_inspector",
            labels! {
                "instance".to_owned() => "ssl_inspector".to_owned(),
                "endpoint".to_owned() => result.endpoint.to_string(),
                "valid".to_owned() => result.valid.to_string(),
            },
            &format!("{}/metrics/job", prometheus_address),
            metric_families,
            None,
        );

        match pushed {
            Ok(_) => debug!("Pushed metrics for {} to {}", result.endpoint, prometheus_address),
            Err(e) => warn!("Failed to push metrics to prometheus: {}", e),
        }
    }
}
