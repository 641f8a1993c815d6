use std::sync::Arc;

use crate::config::Config;
use crate::db::integration_repository::IntegrationConnectionRepository;
use crate::db::oauth_token_repository::OAuthTokenCache;
use crate::db::user_repository::UserDirectory;
use crate::db::workflow_repository::WorkflowRepository;
use crate::engine::credentials::CredentialResolver;
use crate::engine::readiness::{process_env, ReadinessChecker};
use crate::engine::{Executor, NodeRegistry};
use crate::services::events::BroadcastEventSink;

/// The store implementations the engine runs against.
pub struct Stores {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub connections: Arc<dyn IntegrationConnectionRepository>,
    pub tokens: Arc<dyn OAuthTokenCache>,
    pub users: Arc<dyn UserDirectory>,
}

#[derive(Clone)]
pub struct AppState {
    pub workflow_repo: Arc<dyn WorkflowRepository>,
    pub executor: Executor,
    pub events: Arc<BroadcastEventSink>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Arc<Config>, stores: Stores) -> Self {
        let events = Arc::new(BroadcastEventSink::new(config.event_buffer));
        let executor = Executor::new(
            stores.workflows.clone(),
            Arc::new(NodeRegistry::builtin()),
            CredentialResolver::new(stores.connections.clone(), stores.tokens, stores.users),
            ReadinessChecker::new(stores.connections, process_env()),
            events.clone(),
        )
        .with_node_timeout(config.node_timeout);

        AppState {
            workflow_repo: stores.workflows,
            executor,
            events,
            config,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_state(db: Arc<crate::db::mock_db::MockDb>) -> AppState {
    let config = Config::from_lookup(|name| match name {
        "DATABASE_URL" => Some("postgres://unused".to_string()),
        _ => None,
    })
    .expect("test config");

    AppState::new(
        Arc::new(config),
        Stores {
            workflows: db.clone(),
            connections: db.clone(),
            tokens: db.clone(),
            users: db,
        },
    )
}
