use std::error::Error as StdError;
use std::io;

/// The idle-timeout signature. Routers and MPD's own connection_timeout
/// drop quiet connections; this is the one socket error that warrants an
/// immediate reconnect instead of surfacing to the caller.
pub fn idle_timeout(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::TimedOut
}

pub fn connection_refused(err: &(dyn StdError + 'static)) -> bool {
    io_error(err).map(io::Error::kind) == Some(io::ErrorKind::ConnectionRefused)
}

pub fn io_error<'err>(err: &'err (dyn StdError + 'static)) -> Option<&'err io::Error> {
    if let Some(io) = err.downcast_ref() {
        return Some(*io);
    }

    io_error(err.source()?)
}
