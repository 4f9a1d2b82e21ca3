use std::collections::HashMap;
use std::fmt;

use super::error::MatcherError;

/// Operations of the matcher that publish to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PublishRequestForSearchPatients,
    FindMatchingPatient,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::PublishRequestForSearchPatients => "publish_request_for_search_patients",
            Operation::FindMatchingPatient => "find_matching_patient",
        }
    }

    /// Routing key the operation's messages carry through every exchange.
    pub fn routing_key(&self) -> &'static str {
        match self {
            Operation::PublishRequestForSearchPatients => "search_patients.request",
            Operation::FindMatchingPatient => "search_patients.result",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which exchange each operation publishes to.
#[derive(Debug, Clone, Default)]
pub struct PublicationTargets {
    exchanges: HashMap<Operation, String>,
}

impl PublicationTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, operation: Operation, exchange: &str) -> Self {
        if !exchange.is_empty() {
            self.exchanges.insert(operation, exchange.to_string());
        }
        self
    }

    pub fn exchange(&self, operation: Operation) -> Result<&str, MatcherError> {
        self.exchanges
            .get(&operation)
            .map(String::as_str)
            .ok_or(MatcherError::TargetNotConfigured(operation.as_str()))
    }

    /// Checks at startup that every operation a process will call has a target.
    pub fn require_all(&self, operations: &[Operation]) -> Result<(), MatcherError> {
        operations
            .iter()
            .try_for_each(|op| self.exchange(*op).map(|_| ()))
    }
}
