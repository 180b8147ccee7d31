use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Request validation failures. Surfaced to the caller, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
   #[error("query must not be empty")]
   EmptyQuery,
   #[error("query is {len} characters, limit is {max}")]
   QueryTooLong { len: usize, max: usize },
   #[error("top_k must be between 1 and {max}, got {top_k}")]
   TopKOutOfRange { top_k: usize, max: usize },
   #[error("unknown search type '{0}', expected vector, text or hybrid")]
   UnknownMode(String),
}

impl ValidationError {
   pub const fn code(&self) -> &'static str {
      match self {
         Self::EmptyQuery => "EMPTY_QUERY",
         Self::QueryTooLong { .. } => "QUERY_TOO_LONG",
         Self::TopKOutOfRange { .. } => "TOP_K_OUT_OF_RANGE",
         Self::UnknownMode(_) => "UNKNOWN_MODE",
      }
   }
}

#[derive(Debug, Error)]
pub enum Error {
   #[error(transparent)]
   Validation(#[from] ValidationError),

   #[error("retrieval backend unavailable: {0}")]
   BackendUnavailable(String),

   #[error("backend {backend} failed: {reason}")]
   Backend { backend: &'static str, reason: String },

   #[error("request cancelled")]
   Cancelled,

   #[error("cache snapshot: {0}")]
   Snapshot(String),

   #[error("configuration: {0}")]
   Config(#[from] Box<figment::Error>),

   #[error("io: {0}")]
   Io(#[from] std::io::Error),

   #[error("json: {0}")]
   Json(#[from] serde_json::Error),

   #[error("snapshot encoding: {0}")]
   Postcard(#[from] postcard::Error),

   #[error("http: {0}")]
   Http(#[from] reqwest::Error),

   #[error("invalid pattern: {0}")]
   Pattern(#[from] regex::Error),

   #[error("internal error: {0}")]
   Internal(String),
}

impl Error {
   /// Machine-readable code for the outer façade.
   pub const fn code(&self) -> &'static str {
      match self {
         Self::Validation(v) => v.code(),
         Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
         Self::Backend { .. } => "BACKEND_ERROR",
         Self::Cancelled => "CANCELLED",
         Self::Snapshot(_) | Self::Postcard(_) => "CACHE_PERSISTENCE",
         Self::Config(_) => "CONFIG",
         Self::Io(_) => "IO_ERROR",
         Self::Json(_) => "SERIALIZATION_ERROR",
         Self::Http(_) => "HTTP_ERROR",
         Self::Pattern(_) => "CONFIG",
         Self::Internal(_) => "INTERNAL_ERROR",
      }
   }

   pub const fn is_client_error(&self) -> bool {
      matches!(self, Self::Validation(_))
   }

   pub const fn is_unavailable(&self) -> bool {
      matches!(self, Self::BackendUnavailable(_))
   }
}

impl From<figment::Error> for Error {
   fn from(err: figment::Error) -> Self {
      Self::Config(Box::new(err))
   }
}

/// Failure modes of the external rewriting capability. Every variant is
/// recovered by keeping the original query.
#[derive(Debug, Error)]
pub enum RewriteError {
   #[error("transport: {0}")]
   Transport(String),
   #[error("timed out after {0} ms")]
   Timeout(u64),
   #[error("status {0}")]
   Status(u16),
   #[error("malformed response: {0}")]
   Malformed(String),
}

impl From<reqwest::Error> for RewriteError {
   fn from(err: reqwest::Error) -> Self {
      Self::Transport(err.to_string())
   }
}
