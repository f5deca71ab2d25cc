//! The pooled connection abstraction

use std::io;
use std::net::{Shutdown, TcpStream};

/// A connection the pool can hold.
///
/// The pool never inspects a connection. It only moves it between callers
/// and calls [`close`](Connection::close) exactly once when the connection is
/// rejected by [`Pool::put`](crate::Pool::put), reaped for being idle, or
/// drained by [`Pool::close`](crate::Pool::close).
pub trait Connection: Send + 'static {
    /// Close the connection, consuming it.
    fn close(self) -> io::Result<()>;
}

// A peer that already hung up leaves nothing to shut down.
fn shutdown_result(res: io::Result<()>) -> io::Result<()> {
    match res {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

impl Connection for TcpStream {
    fn close(self) -> io::Result<()> {
        shutdown_result(self.shutdown(Shutdown::Both))
    }
}

#[cfg(unix)]
impl Connection for std::os::unix::net::UnixStream {
    fn close(self) -> io::Result<()> {
        shutdown_result(self.shutdown(Shutdown::Both))
    }
}
