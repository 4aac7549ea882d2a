use std::os::fd::AsFd;

use socket2::SockRef;

/// Sets the send buffer size for a socket.
///
/// This is the equivalent of setting the `SO_SNDBUF` socket setting directly.
///
/// # Errors
///
/// If there is an error setting the send buffer size on the given socket, or if the value given
/// as the socket is not a valid socket, an error variant will be returned explaining the underlying
/// I/O error.
pub fn set_send_buffer_size<S>(socket: &S, size: usize) -> std::io::Result<()>
where
    S: AsFd,
{
    SockRef::from(socket).set_send_buffer_size(size)
}

/// Applies an optional send buffer size, logging instead of failing when the OS refuses it.
pub fn apply_send_buffer_size<S>(socket: &S, size: Option<usize>, mode: &'static str)
where
    S: AsFd,
{
    if let Some(size) = size {
        if let Err(error) = set_send_buffer_size(socket, size) {
            warn!(message = "Failed configuring send buffer size.", %error, mode);
        }
    }
}
