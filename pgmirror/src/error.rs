//! Error types and result definitions for replication runs.
//!
//! [`MirrorError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, an optional source error and the caller location. Several table failures of
//! the same run can be aggregated into a single [`MirrorError`].

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use pgmirror_config::shared::Profile;

/// Result type used throughout the crate.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Payload stored for single [`MirrorError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Error returned by every fallible operation of a replication run.
#[derive(Debug, Clone)]
pub struct MirrorError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Failures of several tables collected by a run that continues past failing tables.
    Many {
        errors: Vec<MirrorError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors that can occur during a replication run.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,
    DestinationConnectionFailed,
    AuthenticationError,
    EncryptionError,

    // Query Errors
    SourceQueryFailed,
    DestinationQueryFailed,
    ConstraintViolation,

    // Table Errors
    TableCopyFailed,
    DestinationTableMissing,
    InvalidTableName,

    // Data Errors
    ConversionError,

    // Configuration & IO Errors
    ConfigError,
    IoError,

    // Run Errors
    RunAlreadyInProgress,
    RunCanceled,
    RunDeadlineExceeded,

    // Unknown / Uncategorized
    Unknown,
}

impl ErrorKind {
    /// Returns the connection failure kind matching a profile.
    pub fn connection_failed(profile: Profile) -> ErrorKind {
        match profile {
            Profile::Source => ErrorKind::SourceConnectionFailed,
            Profile::Destination => ErrorKind::DestinationConnectionFailed,
        }
    }

    /// Returns the query failure kind matching a profile.
    pub fn query_failed(profile: Profile) -> ErrorKind {
        match profile {
            Profile::Source => ErrorKind::SourceQueryFailed,
            Profile::Destination => ErrorKind::DestinationQueryFailed,
        }
    }
}

impl MirrorError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if there are none.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the number of errors aggregated in this error, `1` for single errors.
    pub fn len(&self) -> usize {
        match self.repr {
            ErrorRepr::Single(_) => 1,
            ErrorRepr::Many { ref errors, .. } => errors.len(),
        }
    }

    /// Returns `true` for an aggregate built from an empty list.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the static description of this error, or of the first aggregated error.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { ref errors, .. } => errors.first().and_then(|e| e.description()),
        }
    }

    /// Returns the dynamic detail, or the first detail found among aggregated errors.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace of single errors.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the location where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns the aggregated errors, or a slice holding only `self` for single errors.
    pub fn errors(&self) -> &[MirrorError] {
        match self.repr {
            ErrorRepr::Single(_) => std::slice::from_ref(self),
            ErrorRepr::Many { ref errors, .. } => errors,
        }
    }

    /// Returns `true` when retrying connection establishment could succeed.
    ///
    /// Authentication and TLS failures are not retried.
    pub fn is_connection_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SourceConnectionFailed | ErrorKind::DestinationConnectionFailed
        )
    }

    /// Attaches an originating error to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Builds an error from a [`tokio_postgres::Error`] raised on the connection of `profile`.
    ///
    /// The SQLSTATE decides the kind; generic connection and query failures are attributed to
    /// the side the error came from.
    #[track_caller]
    pub fn postgres(profile: Profile, err: tokio_postgres::Error) -> MirrorError {
        let (kind, description) = classify_postgres_error(&err, profile);
        let detail = err.to_string();
        MirrorError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        MirrorError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for MirrorError {
    fn eq(&self, other: &MirrorError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f)?;
                write_backtrace(payload.backtrace.as_ref(), f)
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }

                    for line in lines {
                        if line.is_empty() {
                            write!(f, "\n     ")?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_backtrace(backtrace: &Backtrace, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rendered = backtrace.to_string();
    if rendered.trim().is_empty() {
        return Ok(());
    }

    write!(f, "\n  Backtrace:")?;
    for line in rendered.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    if detail.trim().is_empty() {
        return write!(f, "\n  Detail: <empty>");
    }

    write!(f, "\n  Detail:")?;
    for line in detail.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

/// Maps a Postgres error to an [`ErrorKind`] using its SQLSTATE.
fn classify_postgres_error(
    err: &tokio_postgres::Error,
    profile: Profile,
) -> (ErrorKind, &'static str) {
    use tokio_postgres::error::SqlState;

    let Some(sqlstate) = err.code() else {
        // Errors without SQLSTATE come from the client or the socket.
        let is_io = error::Error::source(err).is_some_and(|source| source.is::<std::io::Error>());
        return if err.is_closed() || is_io {
            (
                ErrorKind::connection_failed(profile),
                "PostgreSQL connection failed",
            )
        } else {
            (ErrorKind::query_failed(profile), "PostgreSQL query failed")
        };
    };

    match *sqlstate {
        // Connection errors (08xxx) and resource errors (53xxx)
        SqlState::CONNECTION_EXCEPTION
        | SqlState::CONNECTION_DOES_NOT_EXIST
        | SqlState::CONNECTION_FAILURE
        | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
        | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
        | SqlState::TOO_MANY_CONNECTIONS
        | SqlState::CANNOT_CONNECT_NOW
        | SqlState::ADMIN_SHUTDOWN
        | SqlState::CRASH_SHUTDOWN
        | SqlState::IDLE_SESSION_TIMEOUT => (
            ErrorKind::connection_failed(profile),
            "PostgreSQL connection failed",
        ),

        // Authentication errors (28xxx)
        SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
            ErrorKind::AuthenticationError,
            "PostgreSQL authentication failed",
        ),

        // Data integrity violations (23xxx)
        SqlState::INTEGRITY_CONSTRAINT_VIOLATION
        | SqlState::NOT_NULL_VIOLATION
        | SqlState::FOREIGN_KEY_VIOLATION
        | SqlState::UNIQUE_VIOLATION
        | SqlState::CHECK_VIOLATION
        | SqlState::EXCLUSION_VIOLATION => (
            ErrorKind::ConstraintViolation,
            "PostgreSQL constraint violation",
        ),

        // Data conversion errors (22xxx)
        SqlState::DATA_EXCEPTION
        | SqlState::INVALID_TEXT_REPRESENTATION
        | SqlState::INVALID_DATETIME_FORMAT
        | SqlState::NUMERIC_VALUE_OUT_OF_RANGE
        | SqlState::STRING_DATA_RIGHT_TRUNCATION
        | SqlState::INVALID_BINARY_REPRESENTATION => (
            ErrorKind::ConversionError,
            "PostgreSQL data conversion failed",
        ),

        // Missing relations
        SqlState::UNDEFINED_TABLE => match profile {
            Profile::Source => (ErrorKind::SourceQueryFailed, "PostgreSQL table not found"),
            Profile::Destination => (
                ErrorKind::DestinationTableMissing,
                "PostgreSQL table not found",
            ),
        },

        SqlState::QUERY_CANCELED | SqlState::OPERATOR_INTERVENTION => (
            ErrorKind::query_failed(profile),
            "PostgreSQL query canceled",
        ),

        SqlState::CONFIG_FILE_ERROR | SqlState::LOCK_FILE_EXISTS => {
            (ErrorKind::ConfigError, "PostgreSQL configuration error")
        }

        SqlState::IO_ERROR | SqlState::DISK_FULL => (
            ErrorKind::query_failed(profile),
            "PostgreSQL I/O error",
        ),

        _ => (ErrorKind::query_failed(profile), "PostgreSQL error"),
    }
}

/// Creates a [`MirrorError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for MirrorError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> MirrorError {
        MirrorError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`MirrorError`] from an error kind, static description and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for MirrorError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> MirrorError {
        MirrorError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates a list of errors.
///
/// A list with exactly one error yields that error unchanged.
impl<E> From<Vec<E>> for MirrorError
where
    E: Into<MirrorError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> MirrorError {
        let location = Location::caller();
        let mut errors: Vec<MirrorError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        MirrorError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts a [`tokio_postgres::Error`] raised by the source connection.
///
/// Use [`MirrorError::postgres`] when the error may come from the destination.
impl From<tokio_postgres::Error> for MirrorError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> MirrorError {
        MirrorError::postgres(Profile::Source, err)
    }
}

impl From<std::io::Error> for MirrorError {
    #[track_caller]
    fn from(err: std::io::Error) -> MirrorError {
        let detail = err.to_string();
        MirrorError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<std::str::Utf8Error> for MirrorError {
    #[track_caller]
    fn from(err: std::str::Utf8Error) -> MirrorError {
        let detail = err.to_string();
        MirrorError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("UTF-8 conversion failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<std::string::FromUtf8Error> for MirrorError {
    #[track_caller]
    fn from(err: std::string::FromUtf8Error) -> MirrorError {
        let detail = err.to_string();
        MirrorError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("UTF-8 string conversion failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<rustls::Error> for MirrorError {
    #[track_caller]
    fn from(err: rustls::Error) -> MirrorError {
        let detail = err.to_string();
        MirrorError::from_components(
            ErrorKind::EncryptionError,
            Cow::Borrowed("TLS configuration failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
