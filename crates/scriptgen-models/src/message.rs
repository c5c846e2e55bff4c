//! Inbound job message as it travels over the broker.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    Audience, ErrorCode, ErrorDetail, GenerationParams, JobId, Language, ScriptLength,
    ScriptStyle, SourceMaterial,
};

/// Raw job message. Every field is optional on the wire so that a message
/// with missing parameters can still be tied to its job and rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptJobMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(
        default,
        rename = "userId",
        alias = "user_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    /// Topic typed by the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_user: Option<String>,
    #[serde(default)]
    pub crawl_data: Vec<SourceMaterial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
}

/// A message that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedJob {
    pub job_id: JobId,
    pub user_id: String,
    pub params: GenerationParams,
}

impl ScriptJobMessage {
    /// Build the wire message for a job submitted through the HTTP API.
    pub fn from_params(job_id: &JobId, user_id: &str, params: &GenerationParams) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            user_id: Some(user_id.to_string()),
            input_user: Some(params.topic.clone()),
            crawl_data: params.sources.clone(),
            audience: Some(params.audience.to_string()),
            style: Some(params.style.to_string()),
            language: Some(params.language.to_string()),
            length: Some(params.length.to_string()),
        }
    }

    /// Job identifier, if present and non-blank.
    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(JobId::from)
    }

    /// Topic, falling back to the first source title.
    pub fn topic(&self) -> Option<String> {
        self.input_user
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| {
                self.crawl_data
                    .first()
                    .map(|s| s.title.trim())
                    .filter(|t| !t.is_empty())
            })
            .map(str::to_string)
    }

    pub fn validate(&self) -> Result<ValidatedJob, ErrorDetail> {
        let job_id = self.job_id().ok_or_else(|| invalid("missing job_id"))?;
        let topic = self.topic().ok_or_else(|| invalid("missing topic"))?;

        let audience: Audience = required(&self.audience, "audience")?
            .parse()
            .map_err(|e| invalid(format!("{}", e)))?;
        let style: ScriptStyle = required(&self.style, "style")?
            .parse()
            .map_err(|e| invalid(format!("{}", e)))?;
        let length: ScriptLength = required(&self.length, "length")?
            .parse()
            .map_err(|e| invalid(format!("{}", e)))?;
        let language: Language = match self.language.as_deref() {
            Some(lang) if !lang.trim().is_empty() => {
                lang.parse().map_err(|e| invalid(format!("{}", e)))?
            }
            _ => Language::default(),
        };

        let params = GenerationParams::new(topic, audience, style, length)
            .with_language(language)
            .with_sources(self.crawl_data.clone());
        params
            .validate()
            .map_err(|e| invalid(format!("invalid parameters: {}", e)))?;

        Ok(ValidatedJob {
            job_id,
            user_id: self.user_id.clone().unwrap_or_default(),
            params,
        })
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ErrorDetail> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| invalid(format!("missing {}", field)))
}

fn invalid(message: impl Into<String>) -> ErrorDetail {
    ErrorDetail::new(ErrorCode::ValidationFailed, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> ScriptJobMessage {
        serde_json::from_str(
            r#"{
                "job_id": "J1",
                "userId": "u1",
                "input_user": "photosynthesis",
                "crawl_data": [{"title": "Plants", "content": "Chlorophyll absorbs light."}],
                "audience": "kids",
                "style": "educational",
                "length": "short"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_message() {
        let job = message().validate().unwrap();
        assert_eq!(job.job_id.as_str(), "J1");
        assert_eq!(job.user_id, "u1");
        assert_eq!(job.params.topic, "photosynthesis");
        assert_eq!(job.params.language, Language::English);
        assert_eq!(job.params.sources.len(), 1);
    }

    #[test]
    fn test_topic_falls_back_to_first_source_title() {
        let mut msg = message();
        msg.input_user = None;
        assert_eq!(msg.validate().unwrap().params.topic, "Plants");
    }

    #[test]
    fn test_user_id_alias() {
        let msg: ScriptJobMessage =
            serde_json::from_str(r#"{"job_id":"J1","user_id":"u2"}"#).unwrap();
        assert_eq!(msg.user_id.as_deref(), Some("u2"));
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let mut msg = message();
        msg.job_id = Some("  ".into());
        let err = msg.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);

        let mut msg = message();
        msg.length = Some("epic".into());
        assert!(msg.validate().unwrap_err().message.contains("length"));

        let mut msg = message();
        msg.audience = None;
        assert_eq!(msg.validate().unwrap_err().message, "missing audience");
    }

    #[test]
    fn test_from_params_round_trips_through_validation() {
        let params = GenerationParams::new(
            "volcanoes",
            Audience::Teenager,
            ScriptStyle::Humorous,
            ScriptLength::Medium,
        )
        .with_language(Language::Vietnamese);
        let msg = ScriptJobMessage::from_params(&JobId::from("J5"), "u5", &params);
        let job = msg.validate().unwrap();
        assert_eq!(job.params, params);
    }
}
