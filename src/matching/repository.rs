use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Read access to the symptoms recorded for a client. Backed by the CRUD
/// service's store in production.
#[async_trait]
pub trait SymptomRepository: Send + Sync {
    async fn symptoms_for(&self, client_id: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Default)]
pub struct InMemorySymptomRepository {
    symptoms: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemorySymptomRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, client_id: &str, symptom: &str) {
        self.symptoms
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(client_id.to_string())
            .or_default()
            .push(symptom.to_string());
    }
}

#[async_trait]
impl SymptomRepository for InMemorySymptomRepository {
    async fn symptoms_for(&self, client_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .symptoms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(client_id)
            .cloned()
            .unwrap_or_default())
    }
}
