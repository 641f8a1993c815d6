use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::engine::node::WorkflowNode;
use crate::engine::nodes::{
    ai::AiCompletionNode,
    condition::ConditionNode,
    delay::DelayNode,
    dispatch::MultiChannelAlertNode,
    email::SendEmailNode,
    google::{CalendarEventNode, ClassroomAnnouncementNode},
    http::HttpRequestNode,
    messaging::{DiscordMessageNode, SlackMessageNode, TeamsMessageNode},
    passthrough::PassThroughNode,
    transform::TransformNode,
    trigger::TriggerNode,
    zoom::ZoomMeetingNode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Trigger,
    Delay,
    HttpRequest,
    Condition,
    Transform,
    SendEmail,
    SlackMessage,
    DiscordMessage,
    TeamsMessage,
    CalendarEvent,
    ClassroomAnnouncement,
    ZoomMeeting,
    AiCompletion,
    MultiChannelAlert,
}

impl NodeKind {
    pub const ALL: [NodeKind; 14] = [
        NodeKind::Trigger,
        NodeKind::Delay,
        NodeKind::HttpRequest,
        NodeKind::Condition,
        NodeKind::Transform,
        NodeKind::SendEmail,
        NodeKind::SlackMessage,
        NodeKind::DiscordMessage,
        NodeKind::TeamsMessage,
        NodeKind::CalendarEvent,
        NodeKind::ClassroomAnnouncement,
        NodeKind::ZoomMeeting,
        NodeKind::AiCompletion,
        NodeKind::MultiChannelAlert,
    ];

    /// Recognized type strings; the first one is canonical.
    pub fn tags(&self) -> &'static [&'static str] {
        match self {
            NodeKind::Trigger => &[
                "trigger",
                "manual-trigger",
                "webhook-trigger",
                "schedule-trigger",
            ],
            NodeKind::Delay => &["delay", "wait"],
            NodeKind::HttpRequest => &["http-request", "http", "http-get"],
            NodeKind::Condition => &["condition", "if"],
            NodeKind::Transform => &["transform", "set"],
            NodeKind::SendEmail => &["send-email", "email"],
            NodeKind::SlackMessage => &["slack-message", "slack"],
            NodeKind::DiscordMessage => &["discord-message", "discord"],
            NodeKind::TeamsMessage => &["teams-message", "microsoft-teams"],
            NodeKind::CalendarEvent => &["google-calendar-event", "google-calendar"],
            NodeKind::ClassroomAnnouncement => {
                &["google-classroom-announcement", "google-classroom"]
            }
            NodeKind::ZoomMeeting => &["zoom-meeting", "zoom"],
            NodeKind::AiCompletion => &["ai-completion", "openai"],
            NodeKind::MultiChannelAlert => &["multi-channel-alert", "alert"],
        }
    }

    pub fn canonical(&self) -> &'static str {
        self.tags()[0]
    }

    pub fn from_type(node_type: &str) -> Option<NodeKind> {
        let normalized = normalize_type(node_type);
        NodeKind::ALL
            .into_iter()
            .find(|kind| kind.tags().contains(&normalized.as_str()))
    }

    fn instantiate(self) -> Box<dyn WorkflowNode> {
        match self {
            NodeKind::Trigger => Box::new(TriggerNode::default()),
            NodeKind::Delay => Box::new(DelayNode::default()),
            NodeKind::HttpRequest => Box::new(HttpRequestNode::default()),
            NodeKind::Condition => Box::new(ConditionNode::default()),
            NodeKind::Transform => Box::new(TransformNode::default()),
            NodeKind::SendEmail => Box::new(SendEmailNode::default()),
            NodeKind::SlackMessage => Box::new(SlackMessageNode::default()),
            NodeKind::DiscordMessage => Box::new(DiscordMessageNode::default()),
            NodeKind::TeamsMessage => Box::new(TeamsMessageNode::default()),
            NodeKind::CalendarEvent => Box::new(CalendarEventNode::default()),
            NodeKind::ClassroomAnnouncement => Box::new(ClassroomAnnouncementNode::default()),
            NodeKind::ZoomMeeting => Box::new(ZoomMeetingNode::default()),
            NodeKind::AiCompletion => Box::new(AiCompletionNode::default()),
            NodeKind::MultiChannelAlert => Box::new(MultiChannelAlertNode::default()),
        }
    }
}

/// Case-insensitive, `_` and spaces read as `-`.
pub fn normalize_type(node_type: &str) -> String {
    node_type
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '_' || c.is_whitespace() { '-' } else { c })
        .collect()
}

pub type NodeFactory = Arc<dyn Fn() -> Box<dyn WorkflowNode> + Send + Sync>;

/// Maps type strings to node factories. Built once at start-up and shared
/// read-only between runs.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for kind in NodeKind::ALL {
            let factory: NodeFactory = Arc::new(move || kind.instantiate());
            for tag in kind.tags() {
                registry.register(tag, Arc::clone(&factory));
            }
        }
        registry
    }

    /// Adds or replaces the factory for `tag`.
    pub fn register(&mut self, tag: &str, factory: NodeFactory) {
        self.factories.insert(normalize_type(tag), factory);
    }

    pub fn is_registered(&self, node_type: &str) -> bool {
        self.factories.contains_key(&normalize_type(node_type))
    }

    /// Builds a configured node. Unknown types fall back to a pass-through
    /// node so older or newer editors never break a run.
    pub fn create(&self, node_type: &str, config: &Value) -> Box<dyn WorkflowNode> {
        let mut node = match self.factories.get(&normalize_type(node_type)) {
            Some(factory) => factory(),
            None => {
                warn!(node_type, "unknown node type, using pass-through node");
                Box::new(PassThroughNode::new(node_type))
            }
        };
        node.configure(config);
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::node::test_context;
    use crate::models::workflow_run::NodeOutcome;
    use serde_json::json;

    #[test]
    fn every_tag_creates_its_kind() {
        let registry = NodeRegistry::builtin();
        for kind in NodeKind::ALL {
            for tag in kind.tags() {
                let node = registry.create(tag, &json!({}));
                assert_eq!(node.node_type(), kind.canonical(), "tag `{tag}`");
            }
        }
    }

    #[test]
    fn type_strings_ignore_case_and_separators() {
        let registry = NodeRegistry::builtin();
        for raw in ["HTTP_Request", " Http-Request ", "http request"] {
            assert_eq!(registry.create(raw, &json!({})).node_type(), "http-request");
        }
        assert_eq!(NodeKind::from_type("Multi_Channel_Alert"), Some(NodeKind::MultiChannelAlert));
        assert_eq!(NodeKind::from_type("microsoft_teams"), Some(NodeKind::TeamsMessage));
        assert_eq!(NodeKind::from_type("whatsapp"), None);
    }

    #[tokio::test]
    async fn unknown_type_passes_through_config() {
        let registry = NodeRegistry::builtin();
        let node = registry.create("legacy-widget", &json!({"color": "blue"}));

        assert_eq!(node.node_type(), "legacy-widget");
        assert!(node.validate().is_ok());

        let output = node
            .execute(&test_context(None))
            .await
            .expect("pass-through never fails");
        assert!(output.success);
        assert_eq!(output.outcome, NodeOutcome::Skipped);
        assert_eq!(output.data, json!({"color": "blue"}));
    }

    #[test]
    fn registered_factories_override_builtins() {
        let mut registry = NodeRegistry::builtin();
        registry.register(
            "Delay",
            Arc::new(|| Box::new(PassThroughNode::new("custom-delay"))),
        );
        assert_eq!(registry.create("delay", &json!({})).node_type(), "custom-delay");
        assert!(registry.is_registered("WAIT"));
        assert!(!NodeRegistry::empty().is_registered("delay"));
    }
}
