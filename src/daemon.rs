//! Daemon mode: detach from the controlling terminal.
//!
//! Classic double-step daemonization: fork (parent exits), become a session
//! leader, move to the filesystem root, and point stdio at /dev/null. Must
//! run before the tokio runtime is built so the child owns the event loop.

use std::ffi::CStr;
use std::io;

/// Detach the process from the controlling terminal.
///
/// On return the caller is running in the detached child; the parent has
/// already exited with status 0.
pub fn daemonize() -> io::Result<()> {
    // SAFETY: the process is still single-threaded here (no runtime yet),
    // so fork/setsid/chdir/dup2 are safe to call in sequence.
    unsafe {
        match libc::fork() {
            -1 => return Err(io::Error::last_os_error()),
            0 => {}
            _ => libc::_exit(0),
        }

        if libc::setsid() == -1 {
            return Err(io::Error::last_os_error());
        }

        let root = CStr::from_bytes_with_nul_unchecked(b"/\0");
        if libc::chdir(root.as_ptr()) == -1 {
            return Err(io::Error::last_os_error());
        }

        let dev_null = CStr::from_bytes_with_nul_unchecked(b"/dev/null\0");
        let null_fd = libc::open(dev_null.as_ptr(), libc::O_RDWR);
        if null_fd == -1 {
            return Err(io::Error::last_os_error());
        }

        for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if libc::dup2(null_fd, fd) == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        if null_fd > libc::STDERR_FILENO {
            libc::close(null_fd);
        }
    }

    Ok(())
}
