use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use urlencoding::encode;

use crate::engine::integrations::keys;
use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};
use crate::engine::nodes::outbound::{self, api_base};
use crate::engine::templating::render;

const DEFAULT_CALENDAR_BASE: &str = "https://www.googleapis.com/calendar/v3";
const DEFAULT_CLASSROOM_BASE: &str = "https://classroom.googleapis.com/v1";

fn parse_time(field: &str, raw: &str) -> Result<OffsetDateTime, ValidationError> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339)
        .map_err(|_| ValidationError::new(field, format!("{field} must be an RFC 3339 timestamp")))
}

fn is_templated(raw: &str) -> bool {
    raw.contains("{{")
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventConfig {
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    pub time_zone: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

#[derive(Default)]
pub struct CalendarEventNode {
    config: NodeConfig<CalendarEventConfig>,
}

#[async_trait]
impl WorkflowNode for CalendarEventNode {
    fn node_type(&self) -> &str {
        "google-calendar-event"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if config.summary.trim().is_empty() {
            return Err(ValidationError::required("summary", "Event title"));
        }
        if config.start.trim().is_empty() {
            return Err(ValidationError::required("start", "Start time"));
        }
        if config.end.trim().is_empty() {
            return Err(ValidationError::required("end", "End time"));
        }
        if !is_templated(&config.start) && !is_templated(&config.end) {
            let start = parse_time("start", &config.start)?;
            let end = parse_time("end", &config.end)?;
            if end <= start {
                return Err(ValidationError::new("end", "End time must be after start time"));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let template_ctx = ctx.template_context();
        let summary = render(&config.summary, &template_ctx);
        let start = parse_time("start", &render(&config.start, &template_ctx))?;
        let end = parse_time("end", &render(&config.end, &template_ctx))?;
        let calendar_id = config
            .calendar_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("primary");

        let stamp = |at: OffsetDateTime| at.format(&Rfc3339).unwrap_or_default();
        let mut start_obj = json!({ "dateTime": stamp(start) });
        let mut end_obj = json!({ "dateTime": stamp(end) });
        if let Some(tz) = config.time_zone.as_deref().filter(|s| !s.trim().is_empty()) {
            start_obj["timeZone"] = json!(tz);
            end_obj["timeZone"] = json!(tz);
        }
        let mut event = json!({
            "summary": summary,
            "start": start_obj,
            "end": end_obj,
        });
        if let Some(description) = &config.description {
            event["description"] = json!(render(description, &template_ctx));
        }
        if let Some(location) = &config.location {
            event["location"] = json!(render(location, &template_ctx));
        }
        let attendees: Vec<Value> = config
            .attendees
            .iter()
            .map(|a| render(a, &template_ctx).trim().to_string())
            .filter(|a| !a.is_empty())
            .map(|email| json!({ "email": email }))
            .collect();
        if !attendees.is_empty() {
            event["attendees"] = Value::Array(attendees);
        }

        let Some(token) = ctx.credential(keys::GOOGLE_ACCESS_TOKEN) else {
            return Ok(NodeOutput::simulated(json!({
                "service": "Google Calendar",
                "event": event,
            })));
        };

        let url = format!(
            "{}/calendars/{}/events",
            api_base("GOOGLE_CALENDAR_API_BASE", DEFAULT_CALENDAR_BASE),
            encode(calendar_id)
        );
        let response = outbound::send(
            "Google Calendar",
            outbound::client().post(url).bearer_auth(token).json(&event),
        )
        .await?;

        Ok(NodeOutput::executed(json!({
            "created": true,
            "service": "Google Calendar",
            "eventId": response.body.get("id").cloned().unwrap_or(Value::Null),
            "htmlLink": response.body.get("htmlLink").cloned().unwrap_or(Value::Null),
        })))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomAnnouncementConfig {
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Default)]
pub struct ClassroomAnnouncementNode {
    config: NodeConfig<ClassroomAnnouncementConfig>,
}

#[async_trait]
impl WorkflowNode for ClassroomAnnouncementNode {
    fn node_type(&self) -> &str {
        "google-classroom-announcement"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if config.course_id.trim().is_empty() {
            return Err(ValidationError::required("courseId", "Course"));
        }
        if config.text.trim().is_empty() {
            return Err(ValidationError::required("text", "Announcement text"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let template_ctx = ctx.template_context();
        let course_id = render(&config.course_id, &template_ctx);
        let text = render(&config.text, &template_ctx);

        let Some(token) = ctx.credential(keys::GOOGLE_ACCESS_TOKEN) else {
            return Ok(NodeOutput::simulated(json!({
                "service": "Google Classroom",
                "courseId": course_id,
                "text": text,
            })));
        };

        let url = format!(
            "{}/courses/{}/announcements",
            api_base("GOOGLE_CLASSROOM_API_BASE", DEFAULT_CLASSROOM_BASE),
            encode(course_id.trim())
        );
        let response = outbound::send(
            "Google Classroom",
            outbound::client()
                .post(url)
                .bearer_auth(token)
                .json(&json!({ "text": text, "state": "PUBLISHED" })),
        )
        .await?;

        Ok(NodeOutput::executed(json!({
            "posted": true,
            "service": "Google Classroom",
            "announcementId": response.body.get("id").cloned().unwrap_or(Value::Null),
        })))
    }
}
