use std::fmt;

use serde::Serialize;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn marker(self) -> &'static str {
        match self {
            StepStatus::Success => "[ok]",
            StepStatus::Failed => "[FAILED]",
            StepStatus::Skipped => "[skipped]",
        }
    }
}

/// One line of a checklist: a pipeline state or a probe surface.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Step {
    pub fn success(name: &'static str, message: impl Into<Option<String>>) -> Self {
        Self {
            name,
            status: StepStatus::Success,
            message: message.into(),
        }
    }

    pub fn failed(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: StepStatus::Failed,
            message: Some(message.into()),
        }
    }

    pub fn skipped(name: &'static str, message: impl Into<Option<String>>) -> Self {
        Self {
            name,
            status: StepStatus::Skipped,
            message: message.into(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} {}", self.status.marker(), self.name)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// Process exit contract for front-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    Success,
    Failed,
    Fatal,
    Cancelled,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Failed => 1,
            ExitCode::Fatal => 2,
            ExitCode::Cancelled => 3,
        }
    }
}

pub fn render_checklist(steps: &[Step]) -> String {
    steps
        .iter()
        .map(|step| format!("{step}\n"))
        .collect()
}
