use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};

/// Creates a socket with SO_REUSEPORT so every worker process can bind
/// the same address and the kernel spreads connections across them.
pub fn create_reuse_port_listener(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
