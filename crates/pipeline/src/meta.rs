//! Pipeline definition types.

use std::fmt;
use std::str::FromStr;

use conduit_queue::{event_name, IN_FLIGHT_SUFFIX};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PipelineError;

// ── Pipe mode ───────────────────────────────────────────────────────

/// How a stage forwards its command output downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeMode {
    /// Publish the raw output as one message.
    #[default]
    Single,
    /// Parse the output as a JSON array and publish each element.
    Each,
}

impl FromStr for PipeMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "single" => Ok(Self::Single),
            "each" => Ok(Self::Each),
            other => Err(PipelineError::Invalid(format!(
                "unknown pipe mode '{other}', expected 'single' or 'each'"
            ))),
        }
    }
}

impl fmt::Display for PipeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Each => f.write_str("each"),
        }
    }
}

/// Accepts a missing, null, or empty `pipe` as [`PipeMode::Single`] and
/// rejects anything unrecognized at load time.
fn deserialize_pipe<'de, D>(deserializer: D) -> Result<PipeMode, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(PipeMode::Single),
        Some(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ── Stage / PipelineMeta ────────────────────────────────────────────

/// One pipeline step: consume `subscribe`, run `process`, produce `publish`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Shell command template, placeholders resolved at load time.
    pub process: String,

    /// Event suffix this stage consumes.
    pub subscribe: String,

    /// Event suffix this stage produces.
    pub publish: String,

    #[serde(default, deserialize_with = "deserialize_pipe")]
    pub pipe: PipeMode,
}

/// An identified, ordered list of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMeta {
    pub id: String,

    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl PipelineMeta {
    /// Parse and validate a YAML pipeline definition.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Full event name for a stage suffix of this pipeline.
    pub fn event(&self, suffix: &str) -> String {
        event_name(&self.id, suffix)
    }

    /// Every event this pipeline touches, subscribe side first, without
    /// duplicates.
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = Vec::new();
        for suffix in self
            .stages
            .iter()
            .map(|s| s.subscribe.as_str())
            .chain(self.stages.iter().map(|s| s.publish.as_str()))
        {
            let event = self.event(suffix);
            if !events.contains(&event) {
                events.push(event);
            }
        }
        events
    }

    /// Check that the definition can be wired onto the queue.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::Invalid("pipeline id is empty".into()));
        }
        if self.stages.is_empty() {
            return Err(PipelineError::Invalid(format!(
                "pipeline '{}' has no stages",
                self.id
            )));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            let n = i + 1;
            if stage.process.trim().is_empty() {
                return Err(PipelineError::Invalid(format!(
                    "pipeline '{}' stage {n} has an empty process",
                    self.id
                )));
            }
            for (field, suffix) in [("subscribe", &stage.subscribe), ("publish", &stage.publish)] {
                if suffix.trim().is_empty() || suffix.starts_with('/') || suffix.ends_with('/') {
                    return Err(PipelineError::Invalid(format!(
                        "pipeline '{}' stage {n} has an invalid {field} suffix '{suffix}'",
                        self.id
                    )));
                }
                // `<id>/<suffix>` must never name another event's in-flight list.
                if is_in_flight_suffix(suffix) {
                    return Err(PipelineError::Invalid(format!(
                        "pipeline '{}' stage {n} {field} suffix '{suffix}' collides with an in-flight list",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

fn is_in_flight_suffix(suffix: &str) -> bool {
    let bare = IN_FLIGHT_SUFFIX.trim_start_matches('/');
    suffix == bare || suffix.ends_with(IN_FLIGHT_SUFFIX)
}
