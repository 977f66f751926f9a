//! In-process, non-persistent operational counters.
//! The crate never installs a recorder itself; callers that want exported
//! metrics install one of the `metrics-exporter-*` crates before starting
//! the proxy. Not a substitute for the excluded "persistent statistics".

pub fn record_session_accepted() {
    metrics::counter!("socks5_sessions_accepted_total").increment(1);
}

pub fn record_session_closed() {
    metrics::counter!("socks5_sessions_closed_total").increment(1);
}

pub fn record_session_reaped() {
    metrics::counter!("socks5_sessions_reaped_total").increment(1);
}

pub fn record_auth_failure() {
    metrics::counter!("socks5_auth_failures_total").increment(1);
}

pub fn record_bytes_spliced(direction: &'static str, bytes: u64) {
    metrics::counter!("socks5_bytes_spliced_total", "direction" => direction).increment(bytes);
}
