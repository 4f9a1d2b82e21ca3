// src/matching/mod.rs
// The patient matcher and the collaborators it is built from.

pub mod error;
pub mod interceptor;
pub mod matcher;
pub mod repository;
pub mod strategy;
pub mod targets;

pub use error::MatcherError;
pub use interceptor::{Interceptor, Invocation, TracingInterceptor};
pub use matcher::PatientMatcher;
pub use repository::{InMemorySymptomRepository, SymptomRepository};
pub use strategy::{MatchStrategy, SimulatedMatch};
pub use targets::{Operation, PublicationTargets};
