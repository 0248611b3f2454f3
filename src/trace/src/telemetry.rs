use opentelemetry::trace::TraceId;
use rand::Rng;

/// Random id attached to the span of one reconciliation.
pub fn get_trace_id() -> TraceId {
    let mut rng = rand::thread_rng();
    let val: u128 = rng.gen();
    TraceId::from(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_get_trace_id() {
        assert_ne!(get_trace_id(), get_trace_id());
        assert_eq!(32, get_trace_id().to_string().len());
    }
}
