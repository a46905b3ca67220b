use serde::Serialize;

/// Crate-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Serializes as `{ error: "...", kind: "..." }` so the embedding application
/// can hand structured failures to its presentation layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Completion provider error: {0}")]
    Provider(String),

    #[error("Completion stream timed out after {0}s of inactivity")]
    StreamIdle(u64),

    #[error("Turn already in progress for conversation {0}")]
    TurnBusy(String),

    #[error("Turn exceeded the maximum of {0} tool iterations")]
    TurnIterations(u32),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Deployment error: {0}")]
    Deployment(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field(
            "kind",
            match self {
                AppError::Config(_) => "config",
                AppError::Provider(_) => "provider",
                AppError::StreamIdle(_) => "stream_idle",
                AppError::TurnBusy(_) => "turn_busy",
                AppError::TurnIterations(_) => "turn_iterations",
                AppError::NotFound(_) => "not_found",
                AppError::Validation(_) => "validation",
                AppError::Deployment(_) => "deployment",
                AppError::Http(_) => "http",
                AppError::Serde(_) => "serde",
                AppError::Io(_) => "io",
                AppError::Internal(_) => "internal",
            },
        )?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_kind() {
        let err = AppError::Provider("boom".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "provider");
        assert!(json["error"].as_str().unwrap().contains("boom"));
    }

    #[test]
    fn test_turn_busy_message_names_conversation() {
        let err = AppError::TurnBusy("conv-42".into());
        assert!(err.to_string().contains("conv-42"));
    }
}
