//! Error types for gearman-client.

use thiserror::Error;

/// Main error type for all client and worker operations.
#[derive(Debug, Error)]
pub enum GearmanError {
    /// I/O error on a socket operation that has no more specific variant.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (payload helpers only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tried to encode a command name that is not in the command table.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Decoded a header whose opcode is not in the command table.
    #[error("Unknown opcode in response header: {0}")]
    UnknownOpcode(u32),

    /// Header with a bad magic tag or an oversized payload length.
    #[error("Malformed packet header: {0}")]
    MalformedHeader(String),

    /// Peer closed the stream.
    #[error("Connection was reset")]
    ConnectionReset,

    /// The server answered with an explicit `error` packet.
    #[error("Server error {code}: {text}")]
    ServerError { code: String, text: String },

    /// Connect attempts did not succeed before the timeout.
    #[error("Can't connect to server {addr}: {reason}")]
    CouldNotConnect { addr: String, reason: String },

    /// Writing a frame failed with a hard socket error.
    #[error("Could not write command to socket: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// A blocking read did not produce a packet in time.
    #[error("Blocking read timed out")]
    ReadTimeout,

    /// A response referenced a handle no task in the set owns.
    #[error("No task owns handle {0}")]
    UnknownHandle(String),

    /// A response that is not valid at this point of the exchange.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Every configured server was unreachable.
    #[error("Couldn't connect to any available servers")]
    NoServersAvailable,

    /// Server string could not be parsed.
    #[error("Invalid server '{0}'")]
    InvalidServer(String),

    /// Server was already configured.
    #[error("Server '{0}' is already registered")]
    DuplicateServer(String),

    /// Function name was already registered on the worker.
    #[error("Function {0} is already registered")]
    DuplicateFunction(String),

    /// Function name is not registered on the worker.
    #[error("Function {0} is not registered")]
    UnknownFunction(String),

    /// Two tasks in one set share a unique id.
    #[error("Task with unique id {0} is already in the set")]
    DuplicateTask(String),

    /// A job submitted through a one-shot call reported `work_fail`.
    #[error("Job {handle} failed")]
    JobFailed { handle: String },

    /// A one-shot call finished its run without the task completing.
    #[error("Timed out waiting for the job to finish")]
    Timeout,

    /// A job handler returned a fatal error.
    #[error("Handler for {function} failed: {message}")]
    Handler { function: String, message: String },
}

/// Coarse classification of [`GearmanError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect timeout/refusal and dropped sockets. Recoverable by reconnecting.
    ConnectFailure,
    /// Framing or correlation violation. Fatal to the current operation.
    Protocol,
    /// Explicit `error` packet from the server.
    Server,
    /// Blocking read or run timeout.
    Timeout,
    /// Job-level outcome reported by a handler or the server.
    Job,
    /// Bad configuration supplied by the caller.
    Config,
}

impl GearmanError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GearmanError::Io(_)
            | GearmanError::ConnectionReset
            | GearmanError::CouldNotConnect { .. }
            | GearmanError::WriteFailed(_)
            | GearmanError::NoServersAvailable => ErrorKind::ConnectFailure,
            GearmanError::UnknownCommand(_)
            | GearmanError::UnknownOpcode(_)
            | GearmanError::MalformedHeader(_)
            | GearmanError::UnknownHandle(_)
            | GearmanError::UnexpectedResponse(_) => ErrorKind::Protocol,
            GearmanError::ServerError { .. } => ErrorKind::Server,
            GearmanError::ReadTimeout | GearmanError::Timeout => ErrorKind::Timeout,
            GearmanError::JobFailed { .. } | GearmanError::Handler { .. } => ErrorKind::Job,
            GearmanError::Json(_)
            | GearmanError::InvalidServer(_)
            | GearmanError::DuplicateServer(_)
            | GearmanError::DuplicateFunction(_)
            | GearmanError::UnknownFunction(_)
            | GearmanError::DuplicateTask(_) => ErrorKind::Config,
        }
    }

    /// True for failures isolated to one socket, after which the connection
    /// should be dropped and retried later.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            GearmanError::Io(_)
                | GearmanError::ConnectionReset
                | GearmanError::CouldNotConnect { .. }
                | GearmanError::WriteFailed(_)
                | GearmanError::ReadTimeout
        )
    }

    /// True for framing/correlation violations.
    pub fn is_protocol(&self) -> bool {
        self.kind() == ErrorKind::Protocol
    }
}

/// Result type alias using GearmanError.
pub type Result<T> = std::result::Result<T, GearmanError>;
