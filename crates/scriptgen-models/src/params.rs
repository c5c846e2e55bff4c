//! Generation parameters and their enumerations.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

#[derive(Debug, Error)]
#[error("Unknown {field}: {value}")]
pub struct ParamParseError {
    pub field: &'static str,
    pub value: String,
}

impl ParamParseError {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

/// Target audience for a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Kids,
    #[serde(alias = "teen")]
    Teenager,
    #[default]
    Adult,
    Expert,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Kids => "kids",
            Audience::Teenager => "teenager",
            Audience::Adult => "adult",
            Audience::Expert => "expert",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Audience {
    type Err = ParamParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kids" => Ok(Audience::Kids),
            "teenager" | "teen" => Ok(Audience::Teenager),
            "adult" => Ok(Audience::Adult),
            "expert" => Ok(Audience::Expert),
            _ => Err(ParamParseError::new("audience", s)),
        }
    }
}

/// Narrative style of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStyle {
    Storytelling,
    #[default]
    Educational,
    Casual,
    #[serde(alias = "funny")]
    Humorous,
}

impl ScriptStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptStyle::Storytelling => "storytelling",
            ScriptStyle::Educational => "educational",
            ScriptStyle::Casual => "casual",
            ScriptStyle::Humorous => "humorous",
        }
    }
}

impl fmt::Display for ScriptStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScriptStyle {
    type Err = ParamParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "storytelling" => Ok(ScriptStyle::Storytelling),
            "educational" => Ok(ScriptStyle::Educational),
            "casual" => Ok(ScriptStyle::Casual),
            "humorous" | "funny" => Ok(ScriptStyle::Humorous),
            _ => Err(ParamParseError::new("style", s)),
        }
    }
}

/// Output language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum Language {
    #[default]
    #[serde(rename = "en-US", alias = "en", alias = "en-us", alias = "english")]
    English,
    #[serde(rename = "vi-VN", alias = "vi", alias = "vi-vn", alias = "vietnamese")]
    Vietnamese,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "en-US",
            Language::Vietnamese => "vi-VN",
        }
    }

    /// Human readable name used in prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Vietnamese => "Vietnamese",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = ParamParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" | "en-us" | "english" => Ok(Language::English),
            "vi" | "vi-vn" | "vietnamese" => Ok(Language::Vietnamese),
            _ => Err(ParamParseError::new("language", s)),
        }
    }
}

/// Target script length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLength {
    #[serde(alias = "very_short")]
    VeryShort,
    #[default]
    Short,
    Medium,
    Long,
}

impl ScriptLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptLength::VeryShort => "veryshort",
            ScriptLength::Short => "short",
            ScriptLength::Medium => "medium",
            ScriptLength::Long => "long",
        }
    }

    /// Upper bound on words requested from the backend.
    pub fn word_budget(&self) -> u32 {
        match self {
            ScriptLength::VeryShort => 80,
            ScriptLength::Short => 150,
            ScriptLength::Medium => 200,
            ScriptLength::Long => 350,
        }
    }
}

impl fmt::Display for ScriptLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScriptLength {
    type Err = ParamParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "veryshort" | "very_short" => Ok(ScriptLength::VeryShort),
            "short" => Ok(ScriptLength::Short),
            "medium" => Ok(ScriptLength::Medium),
            "long" => Ok(ScriptLength::Long),
            _ => Err(ParamParseError::new("length", s)),
        }
    }
}

/// One crawled source document backing the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct SourceMaterial {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Structured parameters for the text stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct GenerationParams {
    #[validate(length(min = 1, max = 500, message = "topic must be 1-500 characters"))]
    pub topic: String,
    pub audience: Audience,
    pub style: ScriptStyle,
    #[serde(default)]
    pub language: Language,
    pub length: ScriptLength,
    #[serde(default)]
    #[validate(length(max = 50, message = "at most 50 source documents"))]
    pub sources: Vec<SourceMaterial>,
}

impl GenerationParams {
    pub fn new(
        topic: impl Into<String>,
        audience: Audience,
        style: ScriptStyle,
        length: ScriptLength,
    ) -> Self {
        Self {
            topic: topic.into(),
            audience,
            style,
            language: Language::default(),
            length,
            sources: Vec::new(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceMaterial>) -> Self {
        self.sources = sources;
        self
    }
}
