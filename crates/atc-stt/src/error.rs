#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("connection closed")]
    Disconnected,
    #[error("provider returned an error: {code} - {message}")]
    Provider { code: String, message: String },
    #[error("reconnect budget exhausted: {0} consecutive failures")]
    Fatal(u32),
}

/// Classification used by the reconnect policy (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Reconnectable,
    Fatal,
}

impl SttError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            SttError::Transport(_) | SttError::Disconnected => ErrorClass::Reconnectable,
            SttError::Provider { code, .. } => classify_close_code(code),
            SttError::Connect(_) | SttError::Protocol(_) | SttError::Serialization(_) => {
                ErrorClass::Fatal
            }
            SttError::Fatal(_) => ErrorClass::Fatal,
        }
    }
}

fn classify_close_code(code: &str) -> ErrorClass {
    match code {
        "1000" | "1001" | "1006" | "eof" | "reset" | "timeout" | "closed" | "session_expired" => {
            ErrorClass::Reconnectable
        }
        _ => ErrorClass::Fatal,
    }
}
