//! Classification gateway contract
//!
//! Importance and stability labels come from an external classifier. The
//! engine never fails a capture because of it: errors, timeouts and
//! out-of-range labels all resolve to the configured defaults and are
//! recorded as a fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::ClassificationConfig;
use crate::error::{LifecycleError, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::metrics::LifecycleMetrics;
use crate::types::Classification;

/// External classifier producing importance/stability labels for content
#[async_trait]
pub trait ClassificationGateway: Send + Sync {
    async fn classify(&self, content: &str) -> Result<Classification>;

    fn name(&self) -> &str {
        "gateway"
    }
}

/// How the labels of a capture were obtained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ClassificationOutcome {
    Classified {
        classification: Classification,
    },
    Fallback {
        classification: Classification,
        reason: String,
    },
}

impl ClassificationOutcome {
    pub fn classification(&self) -> Classification {
        match self {
            ClassificationOutcome::Classified { classification }
            | ClassificationOutcome::Fallback { classification, .. } => *classification,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ClassificationOutcome::Fallback { .. })
    }
}

/// Calls a gateway with a timeout and resolves failures to defaults
#[derive(Clone)]
pub struct ClassificationResolver {
    gateway: Arc<dyn ClassificationGateway>,
    config: ClassificationConfig,
    metrics: Arc<LifecycleMetrics>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl ClassificationResolver {
    pub fn new(
        gateway: Arc<dyn ClassificationGateway>,
        config: ClassificationConfig,
        metrics: Arc<LifecycleMetrics>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            config,
            metrics,
            events,
            clock,
        }
    }

    /// Configured default labels
    pub fn defaults(&self) -> Classification {
        Classification {
            importance: self.config.default_importance,
            stability: self.config.default_stability,
        }
    }

    /// Classify `content`, never failing
    pub async fn classify_with_fallback(&self, content: &str) -> ClassificationOutcome {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.timeout_ms);

        let result = tokio::time::timeout(timeout, self.gateway.classify(content)).await;
        let latency = started.elapsed();

        let (status, failure) = match result {
            Ok(Ok(raw)) => match Classification::new(raw.importance, raw.stability) {
                Ok(classification) => {
                    self.metrics.record_classification("success", latency);
                    debug!(
                        gateway = self.gateway.name(),
                        importance = classification.importance,
                        stability = classification.stability,
                        latency_ms = latency.as_millis() as u64,
                        "Classified memory"
                    );
                    return ClassificationOutcome::Classified { classification };
                }
                Err(e) => ("failure", format!("invalid labels: {}", e)),
            },
            Ok(Err(e)) => ("failure", e.to_string()),
            Err(_) => (
                "timeout",
                format!("classification timed out after {}ms", self.config.timeout_ms),
            ),
        };

        self.metrics.record_classification(status, latency);
        warn!(
            gateway = self.gateway.name(),
            status,
            reason = %failure,
            "Classification unavailable, using defaults"
        );
        self.events.publish(LifecycleEvent::classification_fallback(
            self.clock.now(),
            failure.clone(),
        ));

        ClassificationOutcome::Fallback {
            classification: self.defaults(),
            reason: failure,
        }
    }
}

/// Gateway returning fixed labels
#[derive(Debug, Clone, Copy)]
pub struct StaticClassifier {
    classification: Classification,
}

impl StaticClassifier {
    pub fn new(classification: Classification) -> Self {
        Self { classification }
    }
}

#[async_trait]
impl ClassificationGateway for StaticClassifier {
    async fn classify(&self, _content: &str) -> Result<Classification> {
        Ok(self.classification)
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Gateway that is always unreachable
#[derive(Debug, Clone)]
pub struct FailingClassifier {
    message: String,
}

impl FailingClassifier {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for FailingClassifier {
    fn default() -> Self {
        Self::new("classifier unreachable")
    }
}

#[async_trait]
impl ClassificationGateway for FailingClassifier {
    async fn classify(&self, _content: &str) -> Result<Classification> {
        Err(LifecycleError::Classification(self.message.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::EventKind;

    struct SlowClassifier;

    #[async_trait]
    impl ClassificationGateway for SlowClassifier {
        async fn classify(&self, _content: &str) -> Result<Classification> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Classification {
                importance: 5,
                stability: 5,
            })
        }
    }

    struct OutOfRangeClassifier;

    #[async_trait]
    impl ClassificationGateway for OutOfRangeClassifier {
        async fn classify(&self, _content: &str) -> Result<Classification> {
            Ok(Classification {
                importance: 9,
                stability: 0,
            })
        }
    }

    fn resolver(
        gateway: Arc<dyn ClassificationGateway>,
        timeout_ms: u64,
    ) -> (ClassificationResolver, Arc<LifecycleMetrics>, EventBus) {
        let metrics = Arc::new(LifecycleMetrics::new());
        let events = EventBus::new();
        let config = ClassificationConfig {
            default_importance: 3,
            default_stability: 2,
            timeout_ms,
        };
        let resolver = ClassificationResolver::new(
            gateway,
            config,
            metrics.clone(),
            events.clone(),
            Arc::new(ManualClock::default()),
        );
        (resolver, metrics, events)
    }

    #[tokio::test]
    async fn test_success_passes_labels_through() {
        let labels = Classification::new(4, 5).unwrap();
        let (resolver, metrics, _) = resolver(Arc::new(StaticClassifier::new(labels)), 1000);

        let outcome = resolver.classify_with_fallback("note").await;
        assert_eq!(outcome, ClassificationOutcome::Classified { classification: labels });
        assert_eq!(metrics.classification_requests.get(&["success"]), 1);
        assert_eq!(metrics.classification_latency.count(), 1);
    }

    #[tokio::test]
    async fn test_failure_falls_back_and_emits_event() {
        let (resolver, metrics, events) = resolver(Arc::new(FailingClassifier::default()), 1000);
        let mut rx = events.subscribe();

        let outcome = resolver.classify_with_fallback("note").await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.classification(), Classification::new(3, 2).unwrap());
        assert_eq!(metrics.classification_requests.get(&["failure"]), 1);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.kind, EventKind::ClassificationFallback { .. }));
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let (resolver, metrics, _) = resolver(Arc::new(SlowClassifier), 20);

        let outcome = resolver.classify_with_fallback("note").await;
        assert!(outcome.is_fallback());
        assert_eq!(metrics.classification_requests.get(&["timeout"]), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_labels_are_not_clamped() {
        let (resolver, metrics, _) = resolver(Arc::new(OutOfRangeClassifier), 1000);

        let outcome = resolver.classify_with_fallback("note").await;
        match outcome {
            ClassificationOutcome::Fallback {
                classification,
                reason,
            } => {
                assert_eq!(classification, Classification::new(3, 2).unwrap());
                assert!(reason.contains("invalid labels"));
            }
            other => panic!("expected fallback, got {:?}", other),
        }
        assert_eq!(metrics.classification_requests.get(&["failure"]), 1);
    }

    #[test]
    fn test_outcome_serializes_source() {
        let (resolver, _, _) = resolver(Arc::new(FailingClassifier::default()), 1000);
        let outcome = tokio_test::block_on(resolver.classify_with_fallback("note"));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["source"], "fallback");
        assert_eq!(json["classification"]["importance"], 3);
    }
}
