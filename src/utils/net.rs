//! Listener binding for the relay HTTP server

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};

use nix::sys::socket::{
    self, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol, SockType, SockaddrIn,
    SockaddrIn6,
};

use crate::error::{AppError, Result};

/// Resolve `bind_address:port`, accepting bare IPv4/IPv6 literals
pub fn parse_bind_addr(bind_address: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = bind_address
        .trim_matches(|c| c == '[' || c == ']')
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid bind address: {}", bind_address)))?;
    Ok(SocketAddr::new(ip, port))
}

/// Bind a non-blocking TCP listener with SO_REUSEADDR
///
/// IPv6 sockets are IPv6-only so a separate IPv4 listener on the same port
/// does not collide.
pub fn bind_tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket::socket(family, SockType::Stream, SockFlag::SOCK_CLOEXEC, SockProtocol::Tcp)
        .map_err(io::Error::from)?;

    socket::setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(io::Error::from)?;

    match addr {
        SocketAddr::V4(v4) => {
            socket::bind(fd.as_raw_fd(), &SockaddrIn::from(v4)).map_err(io::Error::from)?;
        }
        SocketAddr::V6(v6) => {
            socket::setsockopt(&fd, sockopt::Ipv6V6Only, &true).map_err(io::Error::from)?;
            socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(v6)).map_err(io::Error::from)?;
        }
    }
    socket::listen(&fd, Backlog::MAXCONN).map_err(io::Error::from)?;

    let listener = unsafe { TcpListener::from_raw_fd(fd.into_raw_fd()) };
    listener.set_nonblocking(true)?;
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind_addr() {
        assert_eq!(
            parse_bind_addr("0.0.0.0", 5000).unwrap(),
            "0.0.0.0:5000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_bind_addr("[::1]", 8080).unwrap(),
            "[::1]:8080".parse::<SocketAddr>().unwrap()
        );
        assert!(matches!(
            parse_bind_addr("localhost", 80),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
