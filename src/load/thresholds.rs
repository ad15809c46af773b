use serde::{Deserialize, Serialize};

use super::{RunMetrics, Thresholds};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdReport {
    pub passed: bool,
    pub failed_thresholds: Vec<String>,
}

/// Check every threshold independently; the report lists all violations.
pub fn evaluate(thresholds: &Thresholds, metrics: &RunMetrics) -> ThresholdReport {
    let mut failed = Vec::new();

    if metrics.avg_response_time_ms > thresholds.avg_response_time_ms {
        failed.push(format!(
            "Average response time {:.2}ms exceeds threshold {}ms",
            metrics.avg_response_time_ms, thresholds.avg_response_time_ms
        ));
    }
    if metrics.p95_response_time_ms > thresholds.p95_response_time_ms {
        failed.push(format!(
            "P95 response time {:.2}ms exceeds threshold {}ms",
            metrics.p95_response_time_ms, thresholds.p95_response_time_ms
        ));
    }
    if metrics.error_rate > thresholds.error_rate {
        failed.push(format!(
            "Error rate {:.2}% exceeds threshold {}%",
            metrics.error_rate, thresholds.error_rate
        ));
    }
    if metrics.throughput < thresholds.min_throughput {
        failed.push(format!(
            "Throughput {:.2} req/s below minimum {} req/s",
            metrics.throughput, thresholds.min_throughput
        ));
    }

    ThresholdReport {
        passed: failed.is_empty(),
        failed_thresholds: failed,
    }
}
