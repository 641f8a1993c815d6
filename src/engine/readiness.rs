use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::db::integration_repository::IntegrationConnectionRepository;
use crate::engine::integrations::{env_fallbacks, required_integrations};
use crate::models::integration::IntegrationType;
use crate::models::workflow::NodeDescriptor;

pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub fn process_env() -> EnvLookup {
    Arc::new(|name: &str| std::env::var(name).ok())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReadiness {
    pub node_id: String,
    pub node_type: String,
    pub required: Vec<IntegrationType>,
    pub missing: Vec<IntegrationType>,
    pub configured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    pub all_configured: bool,
    pub missing: Vec<IntegrationType>,
    pub nodes: Vec<NodeReadiness>,
}

/// Advisory check that every integration a workflow uses is either stored
/// for the organization or fully backed by environment variables.
#[derive(Clone)]
pub struct ReadinessChecker {
    connections: Arc<dyn IntegrationConnectionRepository>,
    env: EnvLookup,
}

impl ReadinessChecker {
    pub fn new(connections: Arc<dyn IntegrationConnectionRepository>, env: EnvLookup) -> Self {
        Self { connections, env }
    }

    fn env_configured(&self, integration: IntegrationType) -> bool {
        env_fallbacks(integration).iter().all(|fallback| {
            (self.env)(fallback.var)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        })
    }

    async fn is_configured(&self, organization_id: Uuid, integration: IntegrationType) -> bool {
        match self
            .connections
            .find_connection(organization_id, integration)
            .await
        {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(err) => warn!(
                %organization_id,
                integration = %integration,
                error = %err,
                "integration connection lookup failed during readiness check"
            ),
        }
        self.env_configured(integration)
    }

    pub async fn check(&self, organization_id: Uuid, nodes: &[NodeDescriptor]) -> ReadinessReport {
        let mut known: HashMap<IntegrationType, bool> = HashMap::new();
        let mut missing: Vec<IntegrationType> = Vec::new();
        let mut statuses = Vec::with_capacity(nodes.len());

        for node in nodes {
            let node_type = node.effective_type();
            let required = required_integrations(node_type).to_vec();
            let mut node_missing = Vec::new();

            for integration in &required {
                let configured = match known.get(integration) {
                    Some(configured) => *configured,
                    None => {
                        let configured = self.is_configured(organization_id, *integration).await;
                        known.insert(*integration, configured);
                        configured
                    }
                };
                if !configured {
                    node_missing.push(*integration);
                    if !missing.contains(integration) {
                        missing.push(*integration);
                    }
                }
            }

            statuses.push(NodeReadiness {
                node_id: node.id.clone(),
                node_type: node_type.to_string(),
                configured: node_missing.is_empty(),
                required,
                missing: node_missing,
            });
        }

        ReadinessReport {
            all_configured: missing.is_empty(),
            missing,
            nodes: statuses,
        }
    }
}
