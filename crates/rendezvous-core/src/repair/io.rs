//! `std::io` adapters for RepairableResource and the outbound TCP recipe.
//!
//! Reads and writes on a repaired stream start over on a new connection; only
//! use these for streams where that is acceptable (line-oriented command
//! channels, not byte-exact transfers). `Interrupted` is passed back to the
//! caller untouched: the same call is meant to be retried on the same stream.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::listener::handshake;
use crate::repair::resource::{RepairError, RepairableResource};

fn into_io(err: RepairError<io::Error>) -> io::Error {
    io::Error::new(err.last().kind(), err)
}

/// Runs `op` on the live instance, repairing on any error but `Interrupted`.
fn call_io<T, R>(
    res: &mut RepairableResource<T, io::Error>,
    mut op: impl FnMut(&mut T) -> io::Result<R>,
) -> io::Result<R> {
    if let Some(inner) = res.get_mut() {
        match op(inner) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
            Err(e) => return res.recover(e, op).map_err(into_io),
            ok => return ok,
        }
    }
    res.call(op).map_err(into_io)
}

impl<T: Read> Read for RepairableResource<T, io::Error> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        call_io(self, |inner| inner.read(&mut buf[..]))
    }
}

impl<T: Write> Write for RepairableResource<T, io::Error> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        call_io(self, |inner| inner.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        call_io(self, |inner| inner.flush())
    }
}

/// Recipe for an outbound link to a worker's listener: connect, then send the
/// handshake frame. Every reconstruction replays both steps.
pub fn connect_recipe(
    addr: SocketAddr,
    name: &str,
    connect_timeout: Duration,
) -> io::Result<impl FnMut() -> io::Result<TcpStream> + Send + 'static> {
    let frame = handshake::encode(name)?;
    Ok(move || {
        let mut stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.write_all(&frame)?;
        debug!(%addr, "connected and sent handshake");
        Ok(stream)
    })
}

/// A self-reconnecting link to `addr`.
pub fn connect(
    addr: SocketAddr,
    name: &str,
    connect_timeout: Duration,
) -> io::Result<RepairableResource<TcpStream, io::Error>> {
    let span = tracing::info_span!("link", %addr, client = name);
    RepairableResource::with_span(connect_recipe(addr, name, connect_timeout)?, span)
}
