//! One named, compiled inspection ruleset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::Instrument;

use crate::config::ApplicationConfig;
use crate::engine::rules::RuleError;
use crate::engine::{Arguments, EvaluationError, Evaluator, Phase, RuleSet, Verdict};

/// Failure building an application set from configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("application '{application}': {source}")]
    Rules {
        application: String,
        #[source]
        source: RuleError,
    },

    #[error("duplicate application '{0}'")]
    Duplicate(String),
}

/// An immutable application: a name bound to an evaluator.
pub struct Application {
    name: String,
    evaluator: Arc<dyn Evaluator>,
    created_at: SystemTime,
    response_check: bool,
    transaction_ttl: Option<Duration>,
    span: tracing::Span,
}

impl Application {
    pub fn new(name: impl Into<String>, evaluator: Arc<dyn Evaluator>) -> Self {
        let name = name.into();
        let span = tracing::info_span!("application", app = %name);
        Self {
            name,
            evaluator,
            created_at: SystemTime::now(),
            response_check: true,
            transaction_ttl: None,
            span,
        }
    }

    /// Build from configuration with the built-in rule engine.
    pub fn from_config(config: &ApplicationConfig) -> Result<Self, BuildError> {
        let rules = RuleSet::compile(config.mode, &config.rules).map_err(|source| {
            BuildError::Rules {
                application: config.name.clone(),
                source,
            }
        })?;

        tracing::debug!(
            app = %config.name,
            rules = rules.len(),
            mode = ?config.mode,
            "Application compiled"
        );

        Ok(Self::new(config.name.clone(), Arc::new(rules))
            .with_response_check(config.response_check)
            .with_transaction_ttl(config.transaction_ttl_ms.map(Duration::from_millis)))
    }

    pub fn with_response_check(mut self, enabled: bool) -> Self {
        self.response_check = enabled;
        self
    }

    pub fn with_transaction_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.transaction_ttl = ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Whether the response phase is evaluated at all.
    pub fn response_check(&self) -> bool {
        self.response_check
    }

    pub fn transaction_ttl(&self) -> Option<Duration> {
        self.transaction_ttl
    }

    /// Run the evaluator inside this application's span.
    pub async fn evaluate(&self, phase: Phase, args: &Arguments) -> Result<Verdict, EvaluationError> {
        self.evaluator
            .evaluate(phase, args)
            .instrument(self.span.clone())
            .await
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .field("response_check", &self.response_check)
            .field("transaction_ttl", &self.transaction_ttl)
            .finish_non_exhaustive()
    }
}

/// Build every configured application, failing as a whole.
pub fn build_applications(
    configs: &[ApplicationConfig],
) -> Result<HashMap<String, Arc<Application>>, BuildError> {
    let mut apps = HashMap::with_capacity(configs.len());
    for config in configs {
        let app = Application::from_config(config)?;
        if apps.insert(config.name.clone(), Arc::new(app)).is_some() {
            return Err(BuildError::Duplicate(config.name.clone()));
        }
    }
    Ok(apps)
}
