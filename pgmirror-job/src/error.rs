use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use pgmirror::error::MirrorError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Captured backtrace of an infrastructure error.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type of the job binary.
///
/// Wraps [`MirrorError`] for replication failures and provides variants for errors raised
/// while setting up the process.
#[derive(Debug)]
pub enum JobError {
    /// Replication error.
    Mirror(MirrorError),
    /// Configuration error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error.
    Io(std::io::Error, CapturedBacktrace),
}

impl JobError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            JobError::Mirror(_) => "replication error",
            JobError::Config(_, _) => "configuration error",
            JobError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            JobError::Mirror(err) => err.backtrace(),
            JobError::Config(_, cb) => Some(&cb.0),
            JobError::Io(_, cb) => Some(&cb.0),
        }
    }

    /// Creates a configuration error from any error.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        JobError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("job failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        // Aggregated errors already render every member.
        if !matches!(self, JobError::Mirror(err) if err.len() > 1) {
            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Mirror(err) => write!(f, "{err}"),
            JobError::Config(source, _) => write!(f, "configuration error: {source}"),
            JobError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for JobError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            JobError::Mirror(err) => err.source(),
            JobError::Config(source, _) => Some(source.as_ref()),
            JobError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<MirrorError> for JobError {
    fn from(err: MirrorError) -> Self {
        JobError::Mirror(err)
    }
}
