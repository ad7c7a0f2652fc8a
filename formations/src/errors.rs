use thiserror::Error;

/// Result type alias for formation engine operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of [`Error`], stable across context wrapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidState,
    InvalidInput,
    ConcurrentUpdate,
    Conversion,
    MissingTenant,
    Constraint,
    Transaction,
    Internal,
}

/// Errors that can occur inside the formation engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("{resource} {id} already exists")]
    AlreadyExists { resource: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{resource} {id} was modified concurrently (expected version {expected})")]
    ConcurrentUpdate {
        resource: &'static str,
        id: String,
        expected: u64,
    },

    #[error("webhook conversion failed: {0}")]
    Conversion(String),

    #[error("cannot read tenant from context")]
    MissingTenant,

    #[error("constraint violated at {location}: {reason}")]
    Constraint { location: String, reason: String },

    /// The state change was persisted, but enforcement after it failed.
    /// Callers must keep the change and only report this error.
    #[error("state change persisted but post-update constraints failed: {0}")]
    MutationCommitted(Box<Error>),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::ConcurrentUpdate { .. } => ErrorKind::ConcurrentUpdate,
            Error::Conversion(_) => ErrorKind::Conversion,
            Error::MissingTenant => ErrorKind::MissingTenant,
            Error::Constraint { .. } => ErrorKind::Constraint,
            Error::MutationCommitted(inner) => inner.kind(),
            Error::Transaction(_) => ErrorKind::Transaction,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Context { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// True when the failing operation already persisted its change.
    pub fn mutation_committed(&self) -> bool {
        match self {
            Error::MutationCommitted(_) => true,
            Error::Context { source, .. } => source.mutation_committed(),
            _ => false,
        }
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Adds operation context ("while listing X for Y") to failed results.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}
