//! CLI error types

use thiserror::Error;

/// Command outcome errors.
///
/// Flow failures inside the client never surface as errors; they show up as
/// a token status. Argument errors are reported by clap before a command
/// runs. These cover what a command itself rejects.
#[derive(Error, Debug)]
pub enum Error {
    #[error("callback URL carried no token, code or error: {0}")]
    CallbackNotRecognized(String),

    #[error("{0} is not available")]
    Unavailable(String),
}
