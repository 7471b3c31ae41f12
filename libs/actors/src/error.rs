//! Actor Runtime Error Types
//!
//! Failures that cross an API boundary. Delivery failures on the routing
//! entry points are also surfaced as plain booleans; the `try_*` variants
//! return these errors instead.

use thiserror::Error;

/// Main runtime error type
#[derive(Error, Debug)]
pub enum ActorError {
    /// Registration with an empty or whitespace-only id
    #[error("actor id can not be blank")]
    BlankActorId,

    /// Send attempted after shutdown began
    #[error("actor system '{system}' is shutting down")]
    SystemShutdown { system: String },

    /// Bounded mailbox at capacity
    #[error("mailbox of actor '{actor}' is full (capacity {capacity})")]
    MailboxFull { actor: String, capacity: usize },

    /// Synchronous call addressed to an unregistered id
    #[error("actor '{actor}' not found")]
    ActorNotFound { actor: String },

    /// A sync envelope handed to the orderly path as payload
    #[error("a sync envelope can not be nested inside another sync call")]
    NestedSyncEnvelope,

    /// Handler returned an error or panicked
    #[error("handler fault in actor '{actor}': {message}")]
    HandlerFault { actor: String, message: String },

    /// Task submitted to a slot that has been shut down
    #[error("execution slot '{slot}' has been shut down")]
    SlotClosed { slot: String },

    /// Slot thread or runtime could not be created
    #[error("failed to start execution slot '{slot}': {source}")]
    SlotSpawn {
        slot: String,
        #[source]
        source: std::io::Error,
    },

    /// Dispatcher thread could not be created
    #[error("failed to spawn dispatcher thread: {0}")]
    DispatcherSpawn(#[source] std::io::Error),

    /// Invalid configuration value
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Configuration sources could not be read or deserialized
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, ActorError>;

impl ActorError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// Create a handler fault error
    pub fn handler_fault(actor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerFault {
            actor: actor.into(),
            message: message.into(),
        }
    }

    /// Create a slot-closed error
    pub fn slot_closed(slot: impl Into<String>) -> Self {
        Self::SlotClosed { slot: slot.into() }
    }

    /// Short category label for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::BlankActorId | Self::ActorNotFound { .. } => "registry",
            Self::SystemShutdown { .. } | Self::MailboxFull { .. } => "delivery",
            Self::NestedSyncEnvelope => "sync",
            Self::HandlerFault { .. } => "handler",
            Self::SlotClosed { .. } | Self::SlotSpawn { .. } | Self::DispatcherSpawn(_) => {
                "execution"
            }
            Self::Configuration { .. } | Self::ConfigLoad(_) => "configuration",
        }
    }

    /// True for failures the sender may retry later (full mailbox)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MailboxFull { .. })
    }
}

/// Render a caught panic payload as text
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(ActorError::BlankActorId.category(), "registry");
        assert_eq!(
            ActorError::MailboxFull { actor: "a".into(), capacity: 1 }.category(),
            "delivery"
        );
        assert_eq!(ActorError::handler_fault("a", "boom").category(), "handler");
        assert_eq!(ActorError::slot_closed("w-1").category(), "execution");
    }

    #[test]
    fn test_retryable_only_for_full_mailbox() {
        assert!(ActorError::MailboxFull { actor: "a".into(), capacity: 4 }.is_retryable());
        assert!(!ActorError::SystemShutdown { system: "s".into() }.is_retryable());
    }

    #[test]
    fn test_panic_message_variants() {
        let static_str: Box<dyn std::any::Any + Send> = Box::new("static");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn std::any::Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(static_str.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
