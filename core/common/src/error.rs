//! Error taxonomy for Capshare.
//!
//! Every failure that leaves the destination layer is one of three kinds,
//! told apart by variant rather than by message text:
//!
//! - [`Error::User`]: an expected failure (a share or delete did not go
//!   through). Recoverable, the application keeps running as is.
//! - [`Error::Host`]: the surrounding shell handed the core something it
//!   cannot explain. The core cannot vouch for its own state afterwards.
//! - [`Error::Destination`]: a condition one provider adapter understands
//!   (missing credentials, authorization state mismatch). Scoped to that
//!   provider.
//!
//! The original failure is carried as the error source so reports can show
//! the full chain.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Shared, clonable error cause.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// Top-level error type for Capshare operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Expected failure the user can dismiss.
    #[error("{message}")]
    User {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    /// Failure reported by the host shell that the core cannot explain.
    #[error("{message}")]
    Host {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    /// Provider-scoped failure raised by a destination adapter.
    #[error("{destination}: {message}")]
    Destination {
        destination: String,
        message: String,
        #[source]
        cause: Option<Cause>,
    },
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Discriminant of [`Error`], used by the error boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    User,
    Host,
    Destination,
}

/// Action the UI may offer when presenting an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryAction {
    /// Close the message and carry on.
    Dismiss,
    /// Reload the application window.
    Reload,
    /// Send a diagnostic report.
    Report,
    /// Quit the application.
    Quit,
    /// Single acknowledgement button.
    Acknowledge,
}

impl ErrorKind {
    /// Recovery actions offered for this kind, in display order.
    pub fn recovery_actions(self) -> &'static [RecoveryAction] {
        match self {
            ErrorKind::User => &[
                RecoveryAction::Dismiss,
                RecoveryAction::Reload,
                RecoveryAction::Report,
            ],
            ErrorKind::Host => &[RecoveryAction::Quit, RecoveryAction::Report],
            ErrorKind::Destination => &[RecoveryAction::Acknowledge],
        }
    }

    /// Dialog title shown for this kind.
    pub fn title(self) -> &'static str {
        match self {
            ErrorKind::User => "Something went wrong",
            ErrorKind::Host => "Unexpected application error",
            ErrorKind::Destination => "Destination error",
        }
    }
}

impl Error {
    /// Create a user-facing recoverable error.
    pub fn user(message: impl Into<String>) -> Self {
        Error::User {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a host/environment error.
    pub fn host(message: impl Into<String>) -> Self {
        Error::Host {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a destination-specific error for the given destination id.
    pub fn destination(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Destination {
            destination: destination.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_cause<E>(mut self, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let slot = match &mut self {
            Error::User { cause, .. }
            | Error::Host { cause, .. }
            | Error::Destination { cause, .. } => cause,
        };
        *slot = Some(Arc::new(error));
        self
    }

    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::User { .. } => ErrorKind::User,
            Error::Host { .. } => ErrorKind::Host,
            Error::Destination { .. } => ErrorKind::Destination,
        }
    }

    /// Human readable message without the destination prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::User { message, .. }
            | Error::Host { message, .. }
            | Error::Destination { message, .. } => message,
        }
    }

    /// Destination id for destination-specific errors.
    pub fn destination_id(&self) -> Option<&str> {
        match self {
            Error::Destination { destination, .. } => Some(destination),
            _ => None,
        }
    }

    /// Recovery actions the UI should offer.
    pub fn recovery_actions(&self) -> &'static [RecoveryAction] {
        self.kind().recovery_actions()
    }
}

/// Attach an error kind and message to foreign errors.
pub trait ResultExt<T> {
    /// Map the error into [`Error::User`].
    fn user_context(self, message: impl Into<String>) -> Result<T>;

    /// Map the error into [`Error::Host`].
    fn host_context(self, message: impl Into<String>) -> Result<T>;

    /// Map the error into [`Error::Destination`].
    fn destination_context(
        self,
        destination: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn user_context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::user(message).with_cause(e))
    }

    fn host_context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::host(message).with_cause(e))
    }

    fn destination_context(
        self,
        destination: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<T> {
        self.map_err(|e| Error::destination(destination, message).with_cause(e))
    }
}

/// Receives errors the core cannot return to a caller, e.g. failures while
/// handling an OAuth redirect.
pub trait ErrorSink: Send + Sync {
    fn handle_error(&self, error: &Error);
}

/// Rendered form of an [`Error`] as shown by the error boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub title: &'static str,
    pub message: String,
    /// Messages of the source chain, outermost first.
    pub causes: Vec<String>,
    pub actions: &'static [RecoveryAction],
}

impl ErrorReport {
    /// Build a report, walking the full source chain.
    pub fn from_error(error: &Error) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(err) = source {
            causes.push(err.to_string());
            source = err.source();
        }

        Self {
            kind: error.kind(),
            title: error.kind().title(),
            message: error.to_string(),
            causes,
            actions: error.recovery_actions(),
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.title, self.message)?;
        for cause in &self.causes {
            writeln!(f, "  caused by: {}", cause)?;
        }
        let actions: Vec<String> = self.actions.iter().map(|a| format!("{:?}", a)).collect();
        write!(f, "  [{}]", actions.join("] ["))
    }
}
