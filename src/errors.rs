use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Spawn error: {0}")]
    Spawn(String),

    #[error("Install error: {0}")]
    Install(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = QueueError::NotFound("job xyz".to_string());
        assert_eq!(err.to_string(), "Not found: job xyz");
    }

    #[test]
    fn test_validation_display() {
        let err = QueueError::Validation("profile_id is required".to_string());
        assert_eq!(err.to_string(), "Validation error: profile_id is required");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = QueueError::InvalidTransition("Completed -> Running".to_string());
        assert_eq!(err.to_string(), "Invalid transition: Completed -> Running");
    }

    #[test]
    fn test_install_display() {
        let err = QueueError::Install("disk full".to_string());
        assert_eq!(err.to_string(), "Install error: disk full");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: QueueError = io_err.into();
        match err {
            QueueError::Storage(msg) => assert!(msg.contains("file missing")),
            other => panic!("Expected Storage, got: {:?}", other),
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err: QueueError = json_err.into();
        match err {
            QueueError::Storage(_) => {}
            other => panic!("Expected Storage, got: {:?}", other),
        }
    }

    #[test]
    fn test_downcast_from_anyhow() {
        let err: anyhow::Error = QueueError::NotFound("job".to_string()).into();
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::NotFound(_))
        ));
    }
}
