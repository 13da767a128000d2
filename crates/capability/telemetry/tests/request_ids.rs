use crop_telemetry::{metrics, new_request_ids, record_delta_dropped, record_poll};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
}

#[test]
fn counters_are_monotonic() {
    let before = metrics().snapshot();
    record_poll();
    record_delta_dropped();
    let after = metrics().snapshot();
    assert!(after.polls > before.polls);
    assert!(after.deltas_dropped > before.deltas_dropped);
}
