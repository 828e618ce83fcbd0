use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use concierge_agent::capabilities::CapabilityRegistry;
use concierge_agent::guardrails::RiskScreen;
use concierge_agent::llm::{CompletionClient, HttpCompletionClient, MockCompletionClient};
use concierge_agent::orchestrator::Orchestrator;
use concierge_agent::sessions::SessionStore;
use concierge_core::config::{AppConfig, ConfigError, LoadOptions};
use concierge_core::{AgentError, AuditSink, TracingAuditSink};

use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    state: AppState,
    backend_mode: &'static str,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("completion client setup failed: {0}")]
    CompletionClient(AgentError),
}

pub fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    // A configured base URL selects the HTTP backend; otherwise the scripted
    // mock serves, which keeps local runs and tests backendless.
    let (client, backend_mode): (Arc<dyn CompletionClient>, &'static str) =
        match &config.llm.base_url {
            Some(base_url) => {
                let client = HttpCompletionClient::new(
                    base_url.clone(),
                    config.llm.api_key.clone(),
                    config.llm.model.clone(),
                    config.llm.timeout_secs,
                    config.llm.max_retries,
                )
                .map_err(BootstrapError::CompletionClient)?;
                (Arc::new(client), "http")
            }
            None => (Arc::new(MockCompletionClient::new()), "mock"),
        };

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let orchestrator = Orchestrator::new(
        client,
        CapabilityRegistry::with_defaults(),
        Arc::clone(&audit),
        &config.dialogue,
    );
    let sessions = SessionStore::new(config.dialogue.session_timeout_minutes);
    let risk = RiskScreen::new(config.risk.clone());

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        sessions: Arc::new(sessions),
        risk: Arc::new(risk),
        audit,
    };

    info!(event_name = "system.bootstrap.ready", "application components assembled");
    Ok(Application { config, state, backend_mode })
}

impl Application {
    pub fn shared(&self) -> AppState {
        self.state.clone()
    }

    pub fn backend_mode(&self) -> &'static str {
        self.backend_mode
    }

    /// Periodically drops idle sessions for the lifetime of the process.
    pub fn spawn_session_sweep(&self) {
        let sessions = Arc::clone(&self.state.sessions);
        let interval = Duration::from_secs(self.config.dialogue.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sessions.sweep_expired();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    #[tokio::test]
    async fn bootstrap_defaults_to_the_mock_backend() {
        let app = bootstrap(LoadOptions::default()).expect("bootstrap should succeed");
        assert_eq!(app.backend_mode(), "mock");
        assert!(app.shared().sessions.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_config() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                confidence_threshold: Some(3.0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });
        assert!(result.is_err());
    }
}
