use chrono::Utc;

/// Wall-clock seconds since epoch with millisecond resolution.
///
/// Consensus components never read the clock themselves; the orchestrator
/// samples it once per operation and passes it down, which keeps elections
/// and validation reproducible under test.
pub fn unix_now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_the_genesis_era() {
        assert!(unix_now() > 1_717_777_777.0);
    }
}
