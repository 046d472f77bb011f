//! TCP listener construction and the forced-unblock helper.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::os::unix::io::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};

/// Create, bind, and listen on all IPv4 interfaces.
///
/// `SO_REUSEADDR` is set so restarts can rebind quickly. Any failure
/// propagates; the caller treats it as fatal.
pub fn bind_listener(port: u16, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

/// Force a blocked `accept` on `listener` to return.
///
/// The signal thread (and the tests) call this after setting the stop flag;
/// the accept loop then observes the flag and exits.
pub fn shutdown_listener(listener: &TcpListener) {
    unsafe {
        libc::shutdown(listener.as_raw_fd(), libc::SHUT_RDWR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    #[test]
    fn listener_accepts_on_an_ephemeral_port() {
        let listener = bind_listener(0, 4).expect("bind");
        let addr = listener.local_addr().expect("addr");
        let _client = TcpStream::connect(addr).expect("connect");
        let (_server, _) = listener.accept().expect("accept");
    }

    #[test]
    fn shutdown_unblocks_a_pending_accept() {
        let listener = bind_listener(0, 4).expect("bind");
        let clone = listener.try_clone().expect("clone");
        let handle = std::thread::spawn(move || listener.accept());
        std::thread::sleep(std::time::Duration::from_millis(100));
        shutdown_listener(&clone);
        let result = handle.join().expect("join");
        assert!(result.is_err(), "accept should fail once the fd is shut down");
    }
}
