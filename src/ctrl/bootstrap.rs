use std::io::prelude::*;
use std::net::*;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Error;

/// How long to wait between two connection attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Listening side of a bootstrap channel.
///
/// The listener accepts exactly one peer and is closed once it has.
#[derive(Debug)]
pub struct BootstrapListener {
    listener: TcpListener,
}

impl BootstrapListener {
    /// Listen on `0.0.0.0:port`. Port 0 picks a free port.
    pub fn bind(port: u16) -> Result<Self, Error> {
        let inaddr_any = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        let listener = TcpListener::bind(inaddr_any)
            .map_err(Error::bootstrap(format!("failed to listen on port {}", port)))?;
        Ok(Self { listener })
    }

    /// Get the port being listened on.
    pub fn local_port(&self) -> Result<u16, Error> {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .map_err(Error::bootstrap("failed to get listener address"))
    }

    /// Wait for one peer, then stop listening.
    pub fn accept(self) -> Result<Bootstrap, Error> {
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(Error::bootstrap("failed to accept"))?;
        log::info!("TCP connection was established with {}", peer);
        Ok(Bootstrap { stream, peer })
    }
}

/// A bootstrap channel: the TCP side-channel carrying the handshake.
///
/// Once open, both ends behave the same.
#[derive(Debug)]
pub struct Bootstrap {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Bootstrap {
    /// Connect to `host:port`, trying every IPv4 address `host` resolves to.
    ///
    /// With a nonzero `retry`, refused connections are retried until `retry`
    /// has elapsed. Otherwise, each address is tried once.
    pub fn connect(host: &str, port: u16, retry: Duration) -> Result<Self, Error> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(Error::bootstrap(format!("failed to resolve {}:{}", host, port)))?
            .filter(SocketAddr::is_ipv4)
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(Error::Bootstrap {
                context: format!("{} has no IPv4 address", host),
                source: std::io::ErrorKind::AddrNotAvailable.into(),
            });
        }

        let start = Instant::now();
        loop {
            let mut last_err = None;
            for addr in &addrs {
                match TcpStream::connect(addr) {
                    Ok(stream) => {
                        log::info!("TCP connection was established with {}", addr);
                        return Ok(Self {
                            stream,
                            peer: *addr,
                        });
                    }
                    Err(e) => last_err = Some(e),
                }
            }

            let e = last_err.unwrap_or_else(|| std::io::ErrorKind::NotConnected.into());
            if start.elapsed() >= retry {
                return Err(Error::Bootstrap {
                    context: format!("couldn't connect to {}:{}", host, port),
                    source: e,
                });
            }
            log::debug!("failed to connect to {}:{} ({}), retrying", host, port, e);
            thread::sleep(RETRY_INTERVAL);
        }
    }

    /// Open the channel in the role given by `server`: connect to it if
    /// present, otherwise listen on `port` and accept one peer.
    pub fn open(server: Option<&str>, port: u16, retry: Duration) -> Result<Self, Error> {
        match server {
            Some(host) => Self::connect(host, port, retry),
            None => BootstrapListener::bind(port)?.accept(),
        }
    }

    /// Get the peer's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Write all of `local`, then read exactly as many bytes into `remote`.
    ///
    /// Both peers must call this with the same length at the same step.
    pub fn sync(&mut self, local: &[u8], remote: &mut [u8]) -> Result<(), Error> {
        if local.len() != remote.len() {
            return Err(Error::Bootstrap {
                context: format!(
                    "sync of {} bytes with a {}-byte receive buffer",
                    local.len(),
                    remote.len()
                ),
                source: std::io::ErrorKind::InvalidInput.into(),
            });
        }

        self.stream
            .write_all(local)
            .map_err(Error::bootstrap("failed writing data during sync"))?;
        self.stream
            .read_exact(remote)
            .map_err(Error::bootstrap("failed reading remote data during sync"))?;
        Ok(())
    }

    /// Exchange one byte with the peer.
    pub fn barrier(&mut self) -> Result<(), Error> {
        let mut dummy = [0u8];
        self.sync(b"Q", &mut dummy)
    }

    /// Shut the channel down.
    pub fn close(self) -> std::io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            // The peer may have closed first.
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Bootstrap, Bootstrap) {
        let listener = BootstrapListener::bind(0).unwrap();
        let port = listener.local_port().unwrap();
        let server = thread::spawn(move || listener.accept().unwrap());
        let client = Bootstrap::connect("127.0.0.1", port, Duration::ZERO).unwrap();
        (server.join().unwrap(), client)
    }

    #[test]
    fn sync_swaps_payloads() {
        let (mut server, mut client) = pair();
        let t = thread::spawn(move || {
            let mut got = [0; 4];
            server.sync(b"ping", &mut got).unwrap();
            server.barrier().unwrap();
            got
        });

        let mut got = [0; 4];
        client.sync(b"pong", &mut got).unwrap();
        client.barrier().unwrap();
        assert_eq!(&got, b"ping");
        assert_eq!(&t.join().unwrap(), b"pong");
        client.close().unwrap();
    }

    #[test]
    fn short_peer_write_fails_sync() {
        let (mut server, mut client) = pair();
        let t = thread::spawn(move || {
            server.stream.write_all(&[0; 10]).unwrap();
            server.close().unwrap();
        });

        let mut got = [0; 34];
        let err = client.sync(&[0; 34], &mut got).unwrap_err();
        t.join().unwrap();
        assert!(matches!(err, Error::Bootstrap { .. }));
    }

    #[test]
    fn connect_without_listener_fails_fast() {
        let port = {
            let listener = BootstrapListener::bind(0).unwrap();
            listener.local_port().unwrap()
        };
        let err = Bootstrap::connect("127.0.0.1", port, Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Bootstrap { .. }));
    }
}
