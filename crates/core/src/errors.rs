use thiserror::Error;

/// Runtime faults that end a turn abnormally.
///
/// Everything here is an infrastructure condition, not user behavior: user
/// behavior (unknown intent, missing slots, forbidden operation) is routed
/// through dialogue states and never raised as an error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("completion backend timed out after {0}ms")]
    Timeout(u64),
    #[error("data access failure: {0}")]
    DataAccess(String),
    #[error("completion backend failure: {0}")]
    Backend(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// The HTTP-shaped status carried in the reply envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Timeout(_) => 504,
            Self::DataAccess(_) | Self::Backend(_) | Self::Internal(_) => 500,
        }
    }

    /// What the end user is told. Internal detail never leaks here.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Timeout(_) => {
                "The request took too long to process. Please try again in a moment."
            }
            Self::DataAccess(_) => {
                "We hit a problem looking that up and are connecting you with a human agent."
            }
            Self::Backend(_) | Self::Internal(_) => {
                "Something went wrong on our side. Please try again."
            }
        }
    }
}
