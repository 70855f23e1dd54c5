use super::*;

use thiserror::Error;

/// Failures raised by the resource store.
#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Failures that abort a flow and reach the handler boundary. Bad input and
/// stale buttons are answered inline and never become a `FlowError`.
#[derive(Debug, Error)]
pub(crate) enum FlowError {
    #[error("storage failure")]
    Storage(#[from] StoreError),
    #[error("{provider} fetch failed: {reason}")]
    ExternalFetch { provider: String, reason: String },
}

impl FlowError {
    pub(crate) fn fetch(provider: impl Into<String>, err: &anyhow::Error) -> Self {
        FlowError::ExternalFetch {
            provider: provider.into(),
            reason: format!("{:#}", err),
        }
    }

    pub(crate) fn user_message(&self) -> String {
        match self {
            FlowError::Storage(StoreError::NotFound(_)) => {
                "Not found. It may have been removed already.".to_string()
            }
            FlowError::Storage(StoreError::InvalidName(name)) => {
                format!("\"{}\" cannot be used as a name.", name)
            }
            FlowError::Storage(_) => "Sorry, a storage error occurred.".to_string(),
            FlowError::ExternalFetch { provider, .. } => {
                format!("Sorry, processing via {} failed.", provider)
            }
        }
    }
}

/// Maps an arbitrary handler error to the message shown to the user.
pub(crate) fn describe_failure(err: &anyhow::Error) -> String {
    if let Some(flow) = err.downcast_ref::<FlowError>() {
        return flow.user_message();
    }
    if let Some(store) = err.downcast_ref::<StoreError>() {
        return match store {
            StoreError::NotFound(_) => "Not found. It may have been removed already.".to_string(),
            _ => "Sorry, a storage error occurred.".to_string(),
        };
    }
    "Sorry, something went wrong. The current operation was reset.".to_string()
}
