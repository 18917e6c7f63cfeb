//! Process stop requests.

use std::fmt;
use std::io;

/// What asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// Ctrl+C from the terminal
    Interrupt,
    /// SIGTERM from a supervisor (unix only)
    Terminate,
}

impl fmt::Display for StopRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopRequest::Interrupt => f.write_str("interrupt"),
            StopRequest::Terminate => f.write_str("terminate"),
        }
    }
}

/// Resolves with the first stop request the process receives.
pub async fn stop_requested() -> io::Result<StopRequest> {
    tokio::select! {
        interrupted = tokio::signal::ctrl_c() => interrupted.map(|()| StopRequest::Interrupt),
        terminated = terminate() => terminated.map(|()| StopRequest::Terminate),
    }
}

#[cfg(unix)]
async fn terminate() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

// No SIGTERM here; Ctrl+C is the only way in.
#[cfg(not(unix))]
async fn terminate() -> io::Result<()> {
    std::future::pending().await
}
