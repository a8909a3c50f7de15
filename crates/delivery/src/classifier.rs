//! ResponseClassifier - TransportOutcome to retry decision
//!
//! Pure and total over the outcome set. This is the only place that decides
//! whether an outcome is worth retrying.

use contracts::{RetryDecision, TransportOutcome};

pub fn classify(outcome: &TransportOutcome) -> RetryDecision {
    match outcome {
        TransportOutcome::TooManyRequests { retry_after_ms, .. } => RetryDecision {
            retry: true,
            retry_after_ms: *retry_after_ms,
        },
        TransportOutcome::Incomplete { .. } | TransportOutcome::NoResponse => RetryDecision {
            retry: true,
            retry_after_ms: None,
        },
        TransportOutcome::Failure { status_code, .. } => RetryDecision {
            retry: (500..=599).contains(status_code),
            retry_after_ms: None,
        },
        TransportOutcome::Success { .. }
        | TransportOutcome::NotModified
        | TransportOutcome::PayloadTooLarge => RetryDecision::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::Destination;
    use std::collections::HashMap;

    fn from_code(code: u16) -> TransportOutcome {
        TransportOutcome::from_status(
            Destination::Sessions,
            code,
            Bytes::new(),
            HashMap::new(),
            Some(30_000),
        )
    }

    #[test]
    fn test_every_status_from_400_to_599() {
        for code in 400..=599u16 {
            let outcome = from_code(code);
            let decision = classify(&outcome);
            let expected = code == 429 || (500..=599).contains(&code);
            assert_eq!(decision.retry, expected, "status {code}");

            if code == 429 {
                assert_eq!(decision.retry_after_ms, Some(30_000));
            } else {
                assert_eq!(decision.retry_after_ms, None, "status {code}");
            }
        }
    }

    #[test]
    fn test_raw_429_failure_is_not_retried() {
        // 429 must arrive as TooManyRequests; a Failure never carries retry semantics
        let outcome = TransportOutcome::Failure {
            status_code: 429,
            headers: HashMap::new(),
        };
        assert!(!classify(&outcome).retry);
    }

    #[test]
    fn test_non_http_variants() {
        let cases = [
            (
                TransportOutcome::Success {
                    body: Bytes::from_static(b"{}"),
                    headers: HashMap::new(),
                },
                false,
            ),
            (TransportOutcome::NotModified, false),
            (TransportOutcome::PayloadTooLarge, false),
            (
                TransportOutcome::Incomplete {
                    error: "connection reset".into(),
                },
                true,
            ),
            (TransportOutcome::NoResponse, true),
        ];
        for (outcome, retry) in cases {
            let decision = classify(&outcome);
            assert_eq!(decision.retry, retry, "{}", outcome.label());
            assert_eq!(decision.retry_after_ms, None);
        }
    }

    #[test]
    fn test_too_many_requests_without_hint() {
        let outcome = TransportOutcome::TooManyRequests {
            destination: Destination::Logs,
            retry_after_ms: None,
        };
        assert_eq!(
            classify(&outcome),
            RetryDecision {
                retry: true,
                retry_after_ms: None
            }
        );
    }
}
