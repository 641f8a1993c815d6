use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    pub duration_ms: Option<u64>,
    pub seconds: Option<u64>,
    pub minutes: Option<u64>,
    pub hours: Option<u64>,
    /// RFC 3339 timestamp to wait for.
    pub until: Option<String>,
}

impl DelayConfig {
    fn has_wait(&self) -> bool {
        self.duration_ms.is_some()
            || self.seconds.is_some()
            || self.minutes.is_some()
            || self.hours.is_some()
            || self.until.is_some()
    }

    fn fixed_duration(&self) -> Option<Duration> {
        let mut total_ms: u64 = self.duration_ms.unwrap_or(0);
        if let Some(seconds) = self.seconds {
            total_ms = total_ms.checked_add(seconds.checked_mul(1_000)?)?;
        }
        if let Some(minutes) = self.minutes {
            total_ms = total_ms.checked_add(minutes.checked_mul(60_000)?)?;
        }
        if let Some(hours) = self.hours {
            total_ms = total_ms.checked_add(hours.checked_mul(3_600_000)?)?;
        }
        Some(Duration::from_millis(total_ms))
    }

    fn until(&self) -> Result<Option<OffsetDateTime>, ValidationError> {
        self.until
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|raw| {
                OffsetDateTime::parse(raw, &Rfc3339).map_err(|_| {
                    ValidationError::new("until", "Delay target must be an RFC 3339 timestamp")
                })
            })
            .transpose()
    }

    /// Longest of the fixed duration and the time left until `until`.
    pub fn plan(&self, now: OffsetDateTime) -> Result<Duration, ValidationError> {
        let fixed = self
            .fixed_duration()
            .ok_or_else(|| ValidationError::new("duration", "Delay duration is too large"))?;
        let until = match self.until()? {
            Some(target) if target > now => {
                Duration::try_from(target - now).unwrap_or(Duration::ZERO)
            }
            _ => Duration::ZERO,
        };
        Ok(fixed.max(until))
    }
}

#[derive(Default)]
pub struct DelayNode {
    config: NodeConfig<DelayConfig>,
}

#[async_trait]
impl WorkflowNode for DelayNode {
    fn node_type(&self) -> &str {
        "delay"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if !config.has_wait() {
            return Err(ValidationError::new(
                "duration",
                "Configure either a wait duration or a target time",
            ));
        }
        config.plan(OffsetDateTime::now_utc()).map(|_| ())
    }

    async fn execute(&self, _ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let wait = config.plan(OffsetDateTime::now_utc())?;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        Ok(NodeOutput::executed(json!({
            "waitedMs": u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
        })))
    }
}
