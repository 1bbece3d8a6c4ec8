use thiserror::Error;

/// Fatal conditions. Everything here aborts the server; per-connection
/// I/O failures never surface as errors, they just close the connection.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket setup failed: {0}")]
    Setup(#[from] std::io::Error),

    #[error("poll failed: {0}")]
    Poll(#[from] nix::errno::Errno),
}
