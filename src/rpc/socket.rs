//! UDP socket layer sending and receiving framed commands.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use tracing::{debug, trace};

use crate::common::Id;
use crate::messages::{self, Command, Signal};

use super::config::Config;

const MTU: usize = 2048;
const UDP_SOCKET_BUFFER_SIZE: i32 = 2 * 1024 * 1024; // 2MB

/// How long a single `recv` blocks; bounds the cadence of the deadline sweep
/// in [Rpc::run](super::Rpc::run).
const READ_TIMEOUT: Duration = Duration::from_millis(50);

pub const DEFAULT_PORT: u16 = 7881;
/// Default request timeout before a registered reply is abandoned and a
/// timeout is synthesized for its lookup.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000); // 2 seconds

/// A UdpSocket wrapper that frames outgoing commands and decodes incoming
/// datagrams into [Signal]s.
#[derive(Debug)]
pub(crate) struct KadSocket {
    id: Id,
    socket: UdpSocket,
    local_addr: SocketAddrV4,
}

impl KadSocket {
    pub(crate) fn new(id: Id, config: &Config) -> Result<Self, std::io::Error> {
        let socket = if let Some(port) = config.port {
            UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))?
        } else {
            match UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))) {
                Ok(socket) => Ok(socket),
                Err(_) => UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))),
            }?
        };

        // Increase OS-level UDP socket buffers to prevent packet loss under
        // bursty lookup traffic. The default (~128KB) is often too small.
        set_socket_buffers(&socket, UDP_SOCKET_BUFFER_SIZE)?;

        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unimplemented!("KadSocket does not support Ipv6"),
        };

        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        Ok(Self {
            id,
            socket,
            local_addr,
        })
    }

    // === Getters ===

    /// Returns the address the socket is listening to.
    #[inline]
    pub(crate) fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    // === Public Methods ===

    /// Send a command to the given address, fire and forget.
    ///
    /// Send errors are swallowed; an expected reply that never arrives is
    /// surfaced as a timeout by the reply registry.
    pub(crate) fn send(&self, address: SocketAddrV4, command: &Command) {
        let bytes = messages::to_bytes(&self.id, command);

        match self.socket.send_to(&bytes, address) {
            Ok(_) => {
                trace!(?address, ?command, "Sent command");
            }
            Err(e) => {
                debug!(?e, ?address, "Error sending command");
            }
        }
    }

    /// Receive a single datagram, blocking up to [READ_TIMEOUT].
    /// On success, returns the decoded command and its source node.
    pub(crate) fn recv_signal(&self) -> Option<Signal> {
        let mut buf = [0_u8; MTU];

        match self.socket.recv_from(&mut buf) {
            Ok((amt, SocketAddr::V4(from))) => {
                let bytes = &buf[..amt];

                if from.port() == 0 {
                    trace!("Datagram from port 0");
                    return None;
                }

                match messages::from_bytes(bytes, from) {
                    Ok(signal) => {
                        trace!(?signal, "Received command");
                        return Some(signal);
                    }
                    Err(error) => {
                        trace!(?error, ?from, "Received invalid datagram");
                    }
                }
            }
            Ok((_, SocketAddr::V6(_))) => {
                trace!("Received IPv6 packet");
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                trace!(?e, "recv_from failed unexpectedly");
            }
        }

        None
    }
}

#[cfg(unix)]
fn set_socket_buffers(socket: &UdpSocket, size: i32) -> std::io::Result<()> {
    use libc::{setsockopt, SOL_SOCKET, SO_RCVBUF, SO_SNDBUF};
    use std::io::Error;
    use std::os::unix::io::AsRawFd;

    let fd = socket.as_raw_fd();

    let recv = unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            SO_RCVBUF,
            &size as *const _ as *const _,
            std::mem::size_of_val(&size) as u32,
        )
    };
    // The OS may clamp the size depending on sysctl limits.
    if recv != 0 {
        return Err(Error::last_os_error());
    }

    let send = unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            SO_SNDBUF,
            &size as *const _ as *const _,
            std::mem::size_of_val(&size) as u32,
        )
    };
    if send != 0 {
        return Err(Error::last_os_error());
    }

    Ok(())
}

#[cfg(not(unix))]
fn set_socket_buffers(_socket: &UdpSocket, _size: i32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    fn socket() -> KadSocket {
        KadSocket::new(
            Id::random(),
            &Config {
                port: Some(0),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn send_and_recv() {
        let server = socket();
        let server_address = SocketAddrV4::new([127, 0, 0, 1].into(), server.local_addr().port());

        let client = socket();
        let client_id = client.id;
        let client_port = client.local_addr().port();

        let target = Id::random();
        let expected = Command::FindNode(target);

        let server_thread = thread::spawn(move || loop {
            if let Some(signal) = server.recv_signal() {
                assert_eq!(signal.source.address().port(), client_port);
                assert_eq!(*signal.source.id(), client_id);
                assert_eq!(signal.command, Command::FindNode(target));
                break;
            }
        });

        client.send(server_address, &expected);

        server_thread.join().unwrap();
    }

    #[test]
    fn drops_invalid_datagrams() {
        let server = socket();
        let server_address = SocketAddrV4::new([127, 0, 0, 1].into(), server.local_addr().port());

        let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
        raw.send_to(b"not a datagram", server_address).unwrap();

        assert!(server.recv_signal().is_none());
    }
}
