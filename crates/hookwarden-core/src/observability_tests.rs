//! Tests for the error aggregator.

use super::*;

mod error_tests {
    use super::*;

    /// Counters split by kind, severity and source.
    #[test]
    fn test_summary_counts() {
        let aggregator = ErrorAggregator::new();
        aggregator.record_error(WebhookSource::Billing, ErrorKind::ServerError, "503");
        aggregator.record_error(WebhookSource::Billing, ErrorKind::ServerError, "502");
        aggregator.record_error(WebhookSource::Social, ErrorKind::Validation, "bad field");

        let summary = aggregator.summary();

        assert_eq!(summary.total_errors, 3);
        assert_eq!(summary.by_kind[&ErrorKind::ServerError], 2);
        assert_eq!(summary.by_kind[&ErrorKind::Validation], 1);
        assert_eq!(summary.by_severity[&Severity::High], 2);
        assert_eq!(summary.by_severity[&Severity::Low], 1);
        assert_eq!(summary.by_source[&WebhookSource::Billing], 2);
        assert_eq!(
            aggregator.count(WebhookSource::Billing, ErrorKind::ServerError),
            2
        );
        assert_eq!(aggregator.count(WebhookSource::Identity, ErrorKind::Network), 0);
    }

    /// The recent ring keeps only the newest samples.
    #[test]
    fn test_recent_samples_are_bounded() {
        let aggregator = ErrorAggregator::with_capacity(3);
        for message in ["one", "two", "three", "four", "five"] {
            aggregator.record_error(WebhookSource::Identity, ErrorKind::Network, message);
        }

        let summary = aggregator.summary();
        let messages: Vec<&str> = summary.recent.iter().map(|s| s.message.as_str()).collect();

        assert_eq!(messages, vec!["three", "four", "five"]);
        assert_eq!(summary.total_errors, 5);
    }

    /// Long messages are truncated on a character boundary.
    #[test]
    fn test_message_truncation() {
        let aggregator = ErrorAggregator::new();
        let long = "é".repeat(MAX_MESSAGE_CHARS + 50);

        aggregator.record_error(WebhookSource::Social, ErrorKind::Internal, &long);

        let sample = &aggregator.summary().recent[0];
        assert_eq!(sample.message.chars().count(), MAX_MESSAGE_CHARS);
        assert_eq!(sample.severity, Severity::High);
    }

    /// Degradation counts only high-severity samples.
    #[test]
    fn test_is_degraded() {
        let aggregator = ErrorAggregator::new();
        aggregator.record_error(WebhookSource::Billing, ErrorKind::Client, "404");
        aggregator.record_error(WebhookSource::Billing, ErrorKind::Network, "reset");
        assert!(!aggregator.is_degraded(1));

        aggregator.record_error(WebhookSource::Billing, ErrorKind::Internal, "bug");
        aggregator.record_error(WebhookSource::Billing, ErrorKind::ServerError, "500");
        assert!(aggregator.is_degraded(2));
        assert!(!aggregator.is_degraded(3));
        assert!(!aggregator.is_degraded(0));
    }
}

mod latency_tests {
    use super::*;

    /// Latency stats report count, mean, p95 and max.
    #[test]
    fn test_latency_stats() {
        let aggregator = ErrorAggregator::new();
        for ms in 1..=100 {
            aggregator.record_latency("dispatch", Duration::from_millis(ms));
        }
        aggregator.record_latency("forward", Duration::from_millis(7));

        let summary = aggregator.summary();
        assert_eq!(summary.latencies.len(), 2);

        let dispatch = &summary.latencies[0];
        assert_eq!(dispatch.operation, "dispatch");
        assert_eq!(dispatch.count, 100);
        assert!((dispatch.mean_ms - 50.5).abs() < 1e-6);
        assert!((dispatch.p95_ms - 96.0).abs() < 1e-6);
        assert!((dispatch.max_ms - 100.0).abs() < 1e-6);

        let forward = &summary.latencies[1];
        assert_eq!(forward.count, 1);
        assert!((forward.p95_ms - 7.0).abs() < 1e-6);
    }

    /// An empty aggregator produces an empty summary.
    #[test]
    fn test_empty_summary() {
        let summary = ErrorAggregator::default().summary();
        assert_eq!(summary, ErrorSummary::default());
    }

    /// The summary serializes with kind names as map keys.
    #[test]
    fn test_summary_serializes() {
        let aggregator = ErrorAggregator::new();
        aggregator.record_error(WebhookSource::Billing, ErrorKind::RateLimited, "429");

        let value = serde_json::to_value(aggregator.summary()).unwrap();
        assert_eq!(value["by_kind"]["rate_limited"], 1);
        assert_eq!(value["by_source"]["billing"], 1);
    }
}
