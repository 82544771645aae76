//! UDP bind management
//!
//! The device owns exactly one [`Bind`]. Changing the listen port closes the
//! current socket and opens a new one.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Source of the device's UDP socket
pub trait Bind: Send + Sync {
    /// Open a socket on `port` (0 = any free port), returning the bound port
    fn open(&mut self, port: u16) -> io::Result<u16>;

    /// Release the socket, if one is open
    fn close(&mut self);

    /// True while a socket is open
    fn is_open(&self) -> bool;
}

/// Non-blocking UDP socket on `0.0.0.0:port`
#[derive(Debug, Default)]
pub struct UdpBind {
    socket: Option<UdpSocket>,
}

impl UdpBind {
    /// Create an unbound instance
    pub fn new() -> Self {
        Self::default()
    }

    fn create_udp_socket(port: u16) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }
}

impl Bind for UdpBind {
    fn open(&mut self, port: u16) -> io::Result<u16> {
        self.close();
        let socket = Self::create_udp_socket(port)?;
        let bound = socket.local_addr()?.port();
        tracing::debug!("UDP socket bound to port {}", bound);
        self.socket = Some(socket);
        Ok(bound)
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            tracing::debug!("UDP socket closed");
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub(crate) struct MockBindState {
        pub busy: HashSet<u16>,
        pub opened: Vec<u16>,
        pub open: bool,
    }

    /// Bind that never touches the network; ports in `busy` fail to open
    #[derive(Clone, Default)]
    pub(crate) struct MockBind(pub Arc<Mutex<MockBindState>>);

    impl MockBind {
        pub(crate) fn set_busy(&self, port: u16) {
            self.0.lock().unwrap().busy.insert(port);
        }

        pub(crate) fn opened(&self) -> Vec<u16> {
            self.0.lock().unwrap().opened.clone()
        }
    }

    impl Bind for MockBind {
        fn open(&mut self, port: u16) -> io::Result<u16> {
            let mut state = self.0.lock().unwrap();
            state.open = false;
            if state.busy.contains(&port) {
                return Err(io::Error::new(io::ErrorKind::AddrInUse, "address in use"));
            }
            let port = if port == 0 { 40000 } else { port };
            state.opened.push(port);
            state.open = true;
            Ok(port)
        }

        fn close(&mut self) {
            self.0.lock().unwrap().open = false;
        }

        fn is_open(&self) -> bool {
            self.0.lock().unwrap().open
        }
    }

    #[test]
    fn test_udp_bind_any_port() {
        let mut bind = UdpBind::new();
        let port = bind.open(0).unwrap();
        assert_ne!(port, 0);
        assert!(bind.is_open());
        assert_eq!(bind.socket.as_ref().unwrap().local_addr().unwrap().port(), port);

        bind.close();
        assert!(!bind.is_open());
        assert!(bind.socket.is_none());
    }

    #[test]
    fn test_udp_bind_port_in_use() {
        let holder = UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let mut bind = UdpBind::new();
        assert!(bind.open(port).is_err());
        assert!(!bind.is_open());
    }
}
