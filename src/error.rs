use thiserror::Error;

/// Errors raised while parsing a raw render request.
///
/// These never touch a backend and are always attributable to the client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required parameter is absent
    #[error("Missing required parameter: {0}")]
    MissingField(&'static str),

    /// A parameter is present but malformed
    #[error("Invalid value for {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    /// A channel color is not 6 or 8 hex digits
    #[error("Invalid color: {0:?}")]
    BadColor(String),

    /// The request does not fit the image it targets
    #[error("Request out of range: {0}")]
    OutOfRange(String),
}

impl ValidationError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            message: message.into(),
        }
    }
}

/// Errors reported by a backend while opening a pixel buffer.
#[derive(Debug, Clone, Error)]
pub enum OpenError {
    /// Another process holds the data; worth retrying
    #[error("Pixel data is locked: {0}")]
    Locked(String),

    /// The backing files do not exist
    #[error("Pixel data not found: {0}")]
    NotFound(String),

    /// The backing files exist but cannot be interpreted
    #[error("Corrupt pixel data: {0}")]
    Corrupt(String),

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl OpenError {
    /// Whether the failure is lock contention that a later attempt may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, OpenError::Locked(_))
    }
}

impl From<std::io::Error> for OpenError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => OpenError::NotFound(err.to_string()),
            std::io::ErrorKind::WouldBlock => OpenError::Locked(err.to_string()),
            _ => OpenError::Io(err.to_string()),
        }
    }
}

/// Errors returned by the buffer resolver.
#[derive(Debug, Clone, Error)]
pub enum AcquireError {
    /// No backend holds data for the image
    #[error("No pixel data for image {image_id}: {reason}")]
    NotFound { image_id: u64, reason: String },

    /// A backend found the data but could not open it
    #[error("Corrupt pixel data for image {image_id}: {reason}")]
    Corrupt { image_id: u64, reason: String },

    /// The open failed for a reason other than missing or corrupt data
    #[error("I/O error opening image {image_id}: {reason}")]
    Io { image_id: u64, reason: String },

    /// Lock contention outlasted the wait budget
    #[error("Timed out after {attempts} attempts waiting for image {image_id}")]
    Timeout { image_id: u64, attempts: u32 },

    /// The resolver no longer hands out buffers
    #[error("Pixel buffer resolver is shutting down")]
    ShuttingDown,
}

/// Errors raised while reading a tile from an open buffer.
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    /// Z, T or channel index outside the declared extents
    #[error("{axis} index {index} out of range (size {size})")]
    OutOfRange {
        axis: &'static str,
        index: u32,
        size: u32,
    },

    /// The requested region does not intersect the plane
    #[error("Region does not intersect the {width}x{height} plane")]
    EmptyRegion { width: u32, height: u32 },

    /// Backend I/O failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Backend data is inconsistent with its metadata
    #[error("Corrupt pixel data: {0}")]
    Corrupt(String),

    /// The buffer was closed
    #[error("Pixel buffer is closed")]
    Closed,
}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> Self {
        ReadError::Io(err.to_string())
    }
}

/// Errors raised by the rendering transforms.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors raised by a raster encoder.
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    #[error("Failed to encode image: {0}")]
    Failed(String),
}

/// Errors raised by a metadata source.
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    #[error("Image not found: {0}")]
    NotFound(u64),

    #[error("Invalid metadata for image {image_id}: {message}")]
    Invalid { image_id: u64, message: String },

    #[error("Metadata I/O error: {0}")]
    Io(String),
}

/// Outward-facing failure of a render request.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error(transparent)]
    BadRequest(#[from] ValidationError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// A worker task panicked or was cancelled
    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Logical outcome of a request, mapped to a status code by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    Timeout,
    InternalError,
}

impl Status {
    /// HTTP status code equivalent.
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::Timeout => 504,
            Status::InternalError => 500,
        }
    }
}

impl DispatchError {
    /// Classify the failure.
    pub fn status(&self) -> Status {
        match self {
            DispatchError::BadRequest(_) => Status::BadRequest,
            DispatchError::Metadata(MetadataError::NotFound(_)) => Status::NotFound,
            DispatchError::Metadata(_) => Status::InternalError,
            DispatchError::Acquire(AcquireError::NotFound { .. }) => Status::NotFound,
            DispatchError::Acquire(AcquireError::Timeout { .. }) => Status::Timeout,
            DispatchError::Acquire(_) => Status::InternalError,
            DispatchError::Read(ReadError::OutOfRange { .. })
            | DispatchError::Read(ReadError::EmptyRegion { .. }) => Status::BadRequest,
            DispatchError::Read(_) => Status::InternalError,
            DispatchError::Render(_) | DispatchError::Encode(_) | DispatchError::Worker(_) => {
                Status::InternalError
            }
        }
    }

    /// Short machine-readable identifier.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::BadRequest(_) => "bad_request",
            DispatchError::Metadata(MetadataError::NotFound(_)) => "not_found",
            DispatchError::Metadata(_) => "metadata_error",
            DispatchError::Acquire(AcquireError::NotFound { .. }) => "not_found",
            DispatchError::Acquire(AcquireError::Timeout { .. }) => "timeout",
            DispatchError::Acquire(_) => "buffer_error",
            DispatchError::Read(ReadError::OutOfRange { .. })
            | DispatchError::Read(ReadError::EmptyRegion { .. }) => "bad_request",
            DispatchError::Read(_) => "read_error",
            DispatchError::Render(_) => "render_error",
            DispatchError::Encode(_) => "encode_error",
            DispatchError::Worker(_) => "internal_error",
        }
    }
}
