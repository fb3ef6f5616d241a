//! Transport (C2): byte-level connect/read/write, interruptible blocking
//! I/O. Not responsible for framing. `rd` has no networking code of its
//! own (it drives ptrace locally), so the TCP adapter here is enriched
//! from the wider pack's idiom (`std::net::TcpStream` + read timeouts)
//! rather than grounded on a specific teacher file; per distilled spec §1
//! Non-goals, concrete transports are themselves out of scope for the
//! core's production use — this module exists so the core's own tests
//! have something to drive end to end.

use crate::error::TransportError;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Transport: Send {
    fn connect(&mut self, url: &str) -> Result<(), TransportError>;
    fn disconnect(&mut self) -> Result<(), TransportError>;
    /// Reads at least one byte into `buf`, returning the count read, unless
    /// `deadline` elapses first or another thread calls `interrupt()`.
    fn read(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> Result<usize, TransportError>;
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
    /// A handle another scheduler task can use to preempt a pending
    /// blocking `read`. Returns `None` for transports that can't be
    /// interrupted out of band (tests mostly poll short deadlines instead).
    fn interrupt_handle(&self) -> Option<Arc<AtomicBool>> {
        None
    }
}

/// Minimal TCP byte-stream transport. Interruption is cooperative: `read`
/// polls in short slices against the deadline and an interrupt flag rather
/// than relying on OS-level thread cancellation, matching the "interruptible
/// from another scheduler task" contract without requiring signal tricks.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    interrupt: Arc<AtomicBool>,
}

impl TcpTransport {
    pub fn new() -> Self {
        TcpTransport {
            stream: None,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

const POLL_SLICE: Duration = Duration::from_millis(50);

impl Transport for TcpTransport {
    fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        let addr = url.strip_prefix("connect://").unwrap_or(url);
        let stream =
            TcpStream::connect(addr).map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        stream
            .set_read_timeout(Some(POLL_SLICE))
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        self.stream = Some(stream);
        self.interrupt.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stream = None;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Eof)?;
        loop {
            if self.interrupt.swap(false, Ordering::SeqCst) {
                return Err(TransportError::Interrupted);
            }
            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    return Err(TransportError::TimedOut);
                }
            }
            match stream.read(buf) {
                Ok(0) => return Err(TransportError::Eof),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Eof)?;
        stream
            .write_all(bytes)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn interrupt_handle(&self) -> Option<Arc<AtomicBool>> {
        Some(self.interrupt.clone())
    }
}

/// In-memory loopback transport used by the core's own tests: a scripted
/// reply queue stands in for the stub, so Packet Codec / Remote Client /
/// Stop-Reply Parser scenarios can be driven deterministically without a
/// real process or socket.
pub struct LoopbackTransport {
    connected: bool,
    inbound: std::collections::VecDeque<u8>,
    pub outbound: Vec<u8>,
    interrupt: Arc<AtomicBool>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport {
            connected: false,
            inbound: std::collections::VecDeque::new(),
            outbound: Vec::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue bytes the next `read()` calls will hand back, as if the stub
    /// had sent them.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self, _url: &str) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::Eof);
        }
        loop {
            if self.interrupt.swap(false, Ordering::SeqCst) {
                return Err(TransportError::Interrupted);
            }
            if let Some(b) = self.inbound.pop_front() {
                buf[0] = b;
                let mut n = 1;
                while n < buf.len() {
                    match self.inbound.pop_front() {
                        Some(b2) => {
                            buf[n] = b2;
                            n += 1;
                        }
                        None => break,
                    }
                }
                return Ok(n);
            }
            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    return Err(TransportError::TimedOut);
                }
            }
            if deadline.is_none() {
                return Err(TransportError::TimedOut);
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Eof);
        }
        self.outbound.extend_from_slice(bytes);
        Ok(())
    }

    fn interrupt_handle(&self) -> Option<Arc<AtomicBool>> {
        Some(self.interrupt.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_round_trips_bytes() {
        let mut t = LoopbackTransport::new();
        t.connect("loop://").unwrap();
        t.write(b"hello").unwrap();
        assert_eq!(t.outbound, b"hello");
        t.push_inbound(b"world");
        let mut buf = [0u8; 16];
        let n = t.read(&mut buf, Some(Instant::now() + Duration::from_millis(10))).unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[test]
    fn disconnected_loopback_reads_as_eof() {
        let mut t = LoopbackTransport::new();
        let mut buf = [0u8; 4];
        assert_eq!(t.read(&mut buf, None), Err(TransportError::Eof));
    }

    #[test]
    fn interrupt_preempts_pending_read() {
        let mut t = LoopbackTransport::new();
        t.connect("loop://").unwrap();
        let handle = t.interrupt_handle().unwrap();
        handle.store(true, Ordering::SeqCst);
        let mut buf = [0u8; 4];
        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(t.read(&mut buf, Some(deadline)), Err(TransportError::Interrupted));
    }
}
