use proptest::prelude::*;
use payroll_run_core::models::MetricType;

/// Non-empty latency samples in milliseconds
pub fn latency_samples_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..60_000.0, 1..200)
}

/// Percentile ranks in `[0, 100]`
pub fn percentile_rank_strategy() -> impl Strategy<Value = f64> {
    0.0f64..=100.0
}

pub fn metric_type_strategy() -> impl Strategy<Value = MetricType> {
    prop::sample::select(MetricType::ALL.to_vec())
}

/// Employee id lists that may contain duplicates
pub fn employee_ids_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..50, 1..20)
}
