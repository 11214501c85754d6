//! `EventFdWaker` — wakes the service event loop.
//!
//! Producers (transports, the pkcheck helper thread, the signal thread)
//! write to an eventfd after posting an event; the loop polls the fd while
//! idle. Coalescing: several `wake()` calls before the loop reads the fd
//! result in a single wakeup (eventfd counter semantics).

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct EventFdWaker {
    fd: RawFd,
}

impl EventFdWaker {
    /// Create a new non-blocking eventfd. The waker owns it and closes it
    /// on drop.
    pub fn create() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn wake(&self) -> io::Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN: counter saturated, a wakeup is already pending
            if err.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Block until woken or `timeout` elapses. Returns true if woken.
    pub fn wait(&self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
        let ret = unsafe { libc::poll(&mut pfd, 1, ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        if ret == 0 {
            return Ok(false);
        }
        if let Err(e) = self.drain() {
            tracing::trace!(error = %e, "eventfd drain failed");
        }
        Ok(true)
    }

    /// Reset the counter so the next wait blocks again.
    /// EAGAIN means another reader already reset it.
    fn drain(&self) -> io::Result<()> {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for EventFdWaker {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_then_wait() {
        let w = EventFdWaker::create().unwrap();
        assert!(!w.wait(Duration::from_millis(0)).unwrap());

        w.wake().unwrap();
        w.wake().unwrap();
        // Coalesced into one wakeup
        assert!(w.wait(Duration::from_millis(10)).unwrap());
        assert!(!w.wait(Duration::from_millis(0)).unwrap());
    }

    #[test]
    fn test_wake_from_other_thread() {
        let w = std::sync::Arc::new(EventFdWaker::create().unwrap());
        let w2 = std::sync::Arc::clone(&w);
        let t = std::thread::spawn(move || w2.wake().unwrap());
        assert!(w.wait(Duration::from_secs(5)).unwrap());
        t.join().unwrap();
    }

    #[test]
    fn test_drain_empty_counter_is_ok() {
        let w = EventFdWaker::create().unwrap();
        // Nothing pending: read fails with EAGAIN, which is not an error
        w.drain().unwrap();

        w.wake().unwrap();
        w.drain().unwrap();
        assert!(!w.wait(Duration::from_millis(0)).unwrap());
        w.drain().unwrap();
    }
}
