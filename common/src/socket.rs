use socket2::{Domain, Socket, Type};
use std::io;
use std::net::{AddrParseError, SocketAddr};

/// Non-blocking listening socket with SO_REUSEPORT/SO_REUSEADDR set,
/// so a restarted process can bind while the old one drains.
pub fn listen_reuse_socket(addr: &SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(128)?;
    Ok(socket)
}

/// Parse a listen address. `:8080` and a bare `8080` bind on all interfaces.
pub fn parse_address(addr: String) -> Result<SocketAddr, AddrParseError> {
    let addr = addr.trim();
    if addr.starts_with(':') {
        return format!("0.0.0.0{}", addr).parse();
    }
    if !addr.is_empty() && addr.bytes().all(|b| b.is_ascii_digit()) {
        return format!("0.0.0.0:{}", addr).parse();
    }

    addr.parse()
}
