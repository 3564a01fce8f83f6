//! Status event domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized observation in a job's history
///
/// Recorded once and never mutated. `message` keeps the orchestrator's
/// original text for display; `label` is the authoritative classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "status")]
    pub label: EventLabel,
    pub message: String,
}

/// Fixed vocabulary for history entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventLabel {
    Created,
    Running,
    ImagePulled,
    PullingImage,
    Complete,
    Error,
    BackOff,
}

impl EventLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            EventLabel::Created => "Created",
            EventLabel::Running => "Running",
            EventLabel::ImagePulled => "ImagePulled",
            EventLabel::PullingImage => "PullingImage",
            EventLabel::Complete => "Complete",
            EventLabel::Error => "Error",
            EventLabel::BackOff => "BackOff",
        }
    }
}

impl std::fmt::Display for EventLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(EventLabel::Created),
            "Running" => Ok(EventLabel::Running),
            "ImagePulled" => Ok(EventLabel::ImagePulled),
            "PullingImage" => Ok(EventLabel::PullingImage),
            "Complete" => Ok(EventLabel::Complete),
            "Error" => Ok(EventLabel::Error),
            "BackOff" => Ok(EventLabel::BackOff),
            other => Err(format!("unknown event label '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_wire_shape() {
        let event = StatusEvent {
            timestamp: "2024-05-01T10:00:00Z".parse().unwrap(),
            label: EventLabel::PullingImage,
            message: "Pulling image \"busybox\"".to_string(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "PullingImage");
        assert_eq!(value["message"], "Pulling image \"busybox\"");
        assert_eq!(value["timestamp"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_label_parse() {
        assert_eq!("BackOff".parse::<EventLabel>(), Ok(EventLabel::BackOff));
        assert!("backoff".parse::<EventLabel>().is_err());
    }
}
