use std::any::Any;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A handler failure as it looks after crossing the worker boundary.
///
/// Only the message and a stack/trace string survive. The concrete error
/// type, its custom fields and its source chain as objects are gone; the
/// chain is flattened into `stack` as text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ErrorRecord {
    pub message: String,
    #[serde(default)]
    pub stack: String,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: stack.into(),
        }
    }

    /// Translate an `anyhow::Error`: `Display` becomes the message, `Debug`
    /// (cause chain plus backtrace when one was captured) becomes the stack.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            stack: format!("{err:?}"),
        }
    }

    /// Translate a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>, handler: &str) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self {
            stack: format!("panicked: {message}\n  in handler `{handler}`"),
            message,
        }
    }

    pub fn unknown_handler(handler: &str) -> Self {
        Self::new(
            format!("unknown handler `{handler}`"),
            "handler id is not registered in this worker's registry",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_message_is_display_text() {
        let err = anyhow::anyhow!("Fail");
        let record = ErrorRecord::from_anyhow(&err);
        assert_eq!(record.message, "Fail");
        assert!(record.stack.contains("Fail"));
    }

    #[test]
    fn anyhow_context_chain_lands_in_stack() {
        let err = anyhow::anyhow!("disk full").context("writing tile");
        let record = ErrorRecord::from_anyhow(&err);
        assert_eq!(record.message, "writing tile");
        assert!(record.stack.contains("disk full"));
    }

    #[test]
    fn panic_payload_variants() {
        let record = ErrorRecord::from_panic(Box::new("boom"), "h");
        assert_eq!(record.message, "boom");
        assert!(record.stack.contains("`h`"));

        let record = ErrorRecord::from_panic(Box::new(String::from("owned boom")), "h");
        assert_eq!(record.message, "owned boom");

        let record = ErrorRecord::from_panic(Box::new(42u8), "h");
        assert_eq!(record.message, "handler panicked");
    }

    #[test]
    fn missing_stack_defaults_to_empty() {
        let record: ErrorRecord = serde_json::from_str(r#"{"message":"x"}"#).unwrap();
        assert_eq!(record.stack, "");
    }
}
