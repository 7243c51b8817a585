//! HTTP reachability probe for preview environments.

use std::time::Duration;

use prenv_reconcile::HealthProbe;

#[derive(Clone)]
pub struct HttpHealthProbe {
    agent: ureq::Agent,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl HealthProbe for HttpHealthProbe {
    fn is_healthy(&self, url: &str) -> bool {
        match self.agent.get(url).call() {
            Ok(response) => (200..300).contains(&response.status()),
            Err(err) => {
                tracing::debug!(url, "health probe failed: {err}");
                false
            }
        }
    }
}
