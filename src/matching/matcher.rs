use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::error::MatcherError;
use super::interceptor::{Interceptor, Invocation};
use super::repository::SymptomRepository;
use super::strategy::MatchStrategy;
use super::targets::{Operation, PublicationTargets};
use crate::message::{Message, SearchRequest, SearchResult};
use crate::notify::MessageSender;
use crate::rabbitmq::Publisher;

/// Drives one search through the pipeline: request, match, result, delivery.
/// Each process attaches only the collaborators its step needs.
pub struct PatientMatcher {
    targets: PublicationTargets,
    strategy: Arc<dyn MatchStrategy>,
    publisher: Option<Arc<Publisher>>,
    sender: Option<Arc<dyn MessageSender>>,
    symptoms: Option<Arc<dyn SymptomRepository>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl PatientMatcher {
    pub fn new(targets: PublicationTargets, strategy: Arc<dyn MatchStrategy>) -> Self {
        PatientMatcher {
            targets,
            strategy,
            publisher: None,
            sender: None,
            symptoms: None,
            interceptors: Vec::new(),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_symptoms(mut self, symptoms: Arc<dyn SymptomRepository>) -> Self {
        self.symptoms = Some(symptoms);
        self
    }

    /// Interceptors run in the order they are added.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    async fn intercept<T, F>(&self, operation: &'static str, client_id: &str, call: F) -> Result<T, MatcherError>
    where
        F: Future<Output = Result<T, MatcherError>>,
    {
        let invocation = Invocation {
            operation,
            client_id,
            started: Instant::now(),
        };
        for interceptor in &self.interceptors {
            interceptor.before(&invocation);
        }

        let result = call.await;

        for interceptor in self.interceptors.iter().rev() {
            interceptor.after(&invocation, result.as_ref().map(|_| ()));
        }
        result
    }

    /// The attached publisher, provided it has a broker behind it.
    fn publisher(&self) -> Result<&Publisher, MatcherError> {
        match &self.publisher {
            Some(publisher) if publisher.is_configured() => Ok(publisher),
            _ => Err(MatcherError::PublisherNotConfigured),
        }
    }

    /// Queues a search for `client_id`. Wiring is checked before anything
    /// touches the network.
    pub async fn publish_request_for_search_patients(&self, client_id: &str) -> Result<(), MatcherError> {
        let operation = Operation::PublishRequestForSearchPatients;
        self.intercept(operation.as_str(), client_id, async {
            let publisher = self.publisher()?;
            let exchange = self.targets.exchange(operation)?;

            let symptoms = match &self.symptoms {
                Some(repository) => repository
                    .symptoms_for(client_id)
                    .await
                    .map_err(MatcherError::Repository)?
                    .len(),
                None => 0,
            };

            let request = SearchRequest {
                client_id: client_id.to_string(),
                symptoms: u32::try_from(symptoms).unwrap_or(u32::MAX),
            };
            let message = Message::json(exchange, &request)
                .map_err(|e| MatcherError::Publish(e.into()))?
                .with_routing_key(operation.routing_key());

            let mut scope = publisher.begin().await?;
            scope.plan(message)?;
            scope.finish().await?;

            info!(client_id, symptoms = request.symptoms, exchange, "Search request published");
            Ok::<_, MatcherError>(())
        })
        .await
    }

    /// Runs the match and, when a publisher is attached, publishes the result.
    pub async fn find_matching_patient(&self, client_id: &str, symptoms: u32) -> Result<u32, MatcherError> {
        let operation = Operation::FindMatchingPatient;
        self.intercept(operation.as_str(), client_id, async {
            let publish_to = match &self.publisher {
                Some(_) => Some((self.publisher()?, self.targets.exchange(operation)?)),
                None => None,
            };

            let found_patients = self.strategy.find_matches(client_id, symptoms).await;
            info!(client_id, symptoms, found_patients, "Matching finished");

            if let Some((publisher, exchange)) = publish_to {
                let result = SearchResult {
                    client_id: client_id.to_string(),
                    found_patients,
                };
                let message = Message::json(exchange, &result)
                    .map_err(|e| MatcherError::Publish(e.into()))?
                    .with_routing_key(operation.routing_key());
                publisher.publish_all(vec![message]).await?;
            } else {
                debug!(client_id, "No publisher attached, result not published");
            }

            Ok::<_, MatcherError>(found_patients)
        })
        .await
    }

    /// Formats the notification for `client_id` and hands it to the sender, if
    /// any. The text is returned either way.
    pub async fn send_message_to_client(&self, client_id: &str, found_patients: u32) -> Result<String, MatcherError> {
        self.intercept("send_message_to_client", client_id, async {
            let text = notification_text(found_patients);

            if let Some(sender) = &self.sender {
                let message = Message::new(client_id, Value::String(text.clone()));
                sender.send(&message).await?;
                info!(client_id, found_patients, "Notification sent");
            }

            Ok::<_, MatcherError>(text)
        })
        .await
    }
}

fn notification_text(found_patients: u32) -> String {
    match found_patients {
        0 => "No patients matching your symptoms were found".to_string(),
        1 => "Found 1 patient matching your symptoms".to_string(),
        n => format!("Found {} patients matching your symptoms", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NoMatch;

    #[async_trait]
    impl MatchStrategy for NoMatch {
        async fn find_matches(&self, _client_id: &str, _symptoms: u32) -> u32 {
            0
        }
    }

    #[derive(Default)]
    struct CountingRepository {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl SymptomRepository for CountingRepository {
        async fn symptoms_for(&self, _client_id: &str) -> anyhow::Result<Vec<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["fever".to_string()])
        }
    }

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Interceptor for Recording {
        fn before(&self, _invocation: &Invocation<'_>) {
            self.log.lock().unwrap().push(format!("before {}", self.name));
        }

        fn after(&self, _invocation: &Invocation<'_>, outcome: Result<(), &MatcherError>) {
            self.log
                .lock()
                .unwrap()
                .push(format!("after {} err={}", self.name, outcome.is_err()));
        }
    }

    fn targets() -> PublicationTargets {
        PublicationTargets::new()
            .with(Operation::PublishRequestForSearchPatients, "requests")
            .with(Operation::FindMatchingPatient, "results")
    }

    #[tokio::test]
    async fn test_unconfigured_publisher_fails_before_any_lookup() {
        let repository = Arc::new(CountingRepository::default());
        let matcher = PatientMatcher::new(targets(), Arc::new(NoMatch))
            .with_publisher(Arc::new(Publisher::unconfigured()))
            .with_symptoms(repository.clone());

        let err = matcher
            .publish_request_for_search_patients("c1")
            .await
            .unwrap_err();
        assert!(matches!(err, MatcherError::PublisherNotConfigured));
        assert_eq!(repository.lookups.load(Ordering::SeqCst), 0);

        let err = matcher.find_matching_patient("c1", 1).await.unwrap_err();
        assert!(matches!(err, MatcherError::PublisherNotConfigured));
    }

    #[test]
    fn test_not_configured_publish_error_maps_to_publisher_not_configured() {
        let err = MatcherError::from(crate::rabbitmq::PublishError::NotConfigured);
        assert!(matches!(err, MatcherError::PublisherNotConfigured));
        assert_eq!(err.kind(), crate::rabbitmq::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_interceptors_wrap_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let matcher = PatientMatcher::new(targets(), Arc::new(NoMatch))
            .with_interceptor(Arc::new(Recording { name: "a", log: log.clone() }))
            .with_interceptor(Arc::new(Recording { name: "b", log: log.clone() }));

        // No publisher attached, so the call fails.
        assert!(matcher.publish_request_for_search_patients("c1").await.is_err());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before a", "before b", "after b err=true", "after a err=true"]
        );

        log.lock().unwrap().clear();
        matcher.send_message_to_client("c1", 2).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before a", "before b", "after b err=false", "after a err=false"]
        );
    }

    #[test]
    fn test_notification_text() {
        assert_eq!(notification_text(0), "No patients matching your symptoms were found");
        assert_eq!(notification_text(1), "Found 1 patient matching your symptoms");
        assert_eq!(notification_text(7), "Found 7 patients matching your symptoms");
    }
}
