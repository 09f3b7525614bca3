use serde::{Deserialize, Serialize};

/// The in-container agent's result, parsed from the finalisation container's stdout (spec.md
/// §6). Closed tagged variant per the "implicit polymorphism on agent payloads" design note:
/// branching on `state` happens once, here, rather than at every call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum AgentResult {
    Succeeded {
        #[serde(default)]
        return_code: Option<i32>,
        #[serde(default)]
        stdout: Option<String>,
        #[serde(default)]
        stderr: Option<String>,
        #[serde(default)]
        command: Option<Vec<String>>,
        #[serde(default)]
        inputs: Option<serde_json::Value>,
        #[serde(default)]
        outputs: Option<serde_json::Value>,
    },
    Failed {
        debug_info: Option<String>,
        executed: bool,
        #[serde(default)]
        return_code: Option<i32>,
        #[serde(default)]
        stdout: Option<String>,
        #[serde(default)]
        stderr: Option<String>,
        #[serde(default)]
        command: Option<Vec<String>>,
    },
}

impl AgentResult {
    pub fn stdout(&self) -> Option<&str> {
        match self {
            AgentResult::Succeeded { stdout, .. } | AgentResult::Failed { stdout, .. } => stdout.as_deref(),
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            AgentResult::Succeeded { stderr, .. } | AgentResult::Failed { stderr, .. } => stderr.as_deref(),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, AgentResult::Succeeded { .. })
    }

    /// Parses and validates the raw JSON produced by the finalisation container's stdout.
    /// Any parse failure is surfaced to the caller so it can be folded into `batch_failure`'s
    /// debug info together with the raw bytes (spec.md §7, "unparseable output").
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_succeeded_payload() {
        let raw = r#"{"state":"succeeded","returnCode":0,"stdout":"hi\n","stderr":"","executed":true}"#;
        let result = AgentResult::parse(raw).unwrap();
        assert!(result.is_succeeded());
        assert_eq!(result.stdout(), Some("hi\n"));
    }

    #[test]
    fn parses_failed_payload() {
        let raw = r#"{"state":"failed","debugInfo":"boom","executed":true,"returnCode":1}"#;
        let result = AgentResult::parse(raw).unwrap();
        assert!(!result.is_succeeded());
    }

    #[test]
    fn rejects_garbage() {
        assert!(AgentResult::parse("not json").is_err());
    }
}
