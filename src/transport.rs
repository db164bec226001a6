//! Raw byte I/O with timeouts and per-port mutual exclusion (§4.1).
//!
//! Grounded in the blocking `serialport` usage real CCNET drivers use: one
//! owned [`serialport::SerialPort`] behind a mutex, read one byte at a time
//! when hunting for a sync, and known-length chunks otherwise.

use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Exclusive owner of one serial port. `write` and `read_exact` each take
/// the lock for their own span; a caller needing an atomic write-then-read
/// exchange (so no other caller's frame can interleave) holds its own
/// higher-level lock across both calls instead.
pub struct SerialLink {
    port: Mutex<Box<dyn serialport::SerialPort>>,
}

impl SerialLink {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()?;

        Ok(Self {
            port: Mutex::new(port),
        })
    }

    /// For tests: wrap an already-open port (or a mock implementing the same trait).
    pub fn from_port(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            port: Mutex::new(port),
        }
    }

    /// Write `bytes`, blocking until the OS flush completes.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut port = self.port.lock().unwrap();
        port.write_all(bytes).map_err(|e| Error::from(e))?;
        port.flush().map_err(Error::from)?;
        Ok(())
    }

    /// Read exactly `n` bytes, failing with `Timeout` if `deadline` elapses first.
    pub fn read_exact(&self, n: usize, deadline: Instant) -> Result<Vec<u8>> {
        let mut port = self.port.lock().unwrap();
        Self::read_exact_locked(port.as_mut(), n, deadline)
    }

    /// Discard whatever bytes are sitting in the OS input buffer. Used when
    /// a reset must guarantee the next read starts on a clean frame
    /// boundary rather than a stale byte left over from before the reset.
    pub fn clear_input(&self) -> Result<()> {
        let port = self.port.lock().unwrap();
        port.clear(serialport::ClearBuffer::Input).map_err(Error::from)
    }

    fn read_exact_locked(
        port: &mut dyn serialport::SerialPort,
        n: usize,
        deadline: Instant,
    ) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;

        while filled < n {
            if Instant::now() >= deadline {
                return Err(Error::timeout(format!(
                    "read_exact: only {filled}/{n} bytes before deadline"
                )));
            }

            match port.read(&mut buf[filled..]) {
                Ok(0) => return Err(Error::io("serial port returned EOF")),
                Ok(read) => filled += read,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(Error::from(e)),
            }
        }

        Ok(buf)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// An in-memory stand-in for [`serialport::SerialPort`], backed by two
    /// queues: bytes a test arranges to be "received", and bytes the code
    /// under test "transmits" for later assertion.
    pub struct MockPort {
        inbound: StdMutex<VecDeque<u8>>,
        outbound: StdMutex<Vec<u8>>,
    }

    impl MockPort {
        pub fn new(inbound: Vec<u8>) -> Self {
            Self {
                inbound: StdMutex::new(inbound.into()),
                outbound: StdMutex::new(Vec::new()),
            }
        }

        pub fn written(&self) -> Vec<u8> {
            self.outbound.lock().unwrap().clone()
        }

        pub fn push_inbound(&self, bytes: &[u8]) {
            self.inbound.lock().unwrap().extend(bytes.iter().copied());
        }
    }

    impl io::Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut inbound = self.inbound.lock().unwrap();
            if inbound.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = inbound.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl io::Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl serialport::SerialPort for MockPort {
        fn name(&self) -> Option<String> {
            Some("mock".into())
        }
        fn baud_rate(&self) -> serialport::Result<u32> {
            Ok(9600)
        }
        fn data_bits(&self) -> serialport::Result<serialport::DataBits> {
            Ok(serialport::DataBits::Eight)
        }
        fn flow_control(&self) -> serialport::Result<serialport::FlowControl> {
            Ok(serialport::FlowControl::None)
        }
        fn parity(&self) -> serialport::Result<serialport::Parity> {
            Ok(serialport::Parity::None)
        }
        fn stop_bits(&self) -> serialport::Result<serialport::StopBits> {
            Ok(serialport::StopBits::One)
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }
        fn set_baud_rate(&mut self, _: u32) -> serialport::Result<()> {
            Ok(())
        }
        fn set_data_bits(&mut self, _: serialport::DataBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_flow_control(&mut self, _: serialport::FlowControl) -> serialport::Result<()> {
            Ok(())
        }
        fn set_parity(&mut self, _: serialport::Parity) -> serialport::Result<()> {
            Ok(())
        }
        fn set_stop_bits(&mut self, _: serialport::StopBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_timeout(&mut self, _: Duration) -> serialport::Result<()> {
            Ok(())
        }
        fn write_request_to_send(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn write_data_terminal_ready(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn bytes_to_read(&self) -> serialport::Result<u32> {
            Ok(self.inbound.lock().unwrap().len() as u32)
        }
        fn bytes_to_write(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn clear(&self, _: serialport::ClearBuffer) -> serialport::Result<()> {
            self.inbound.lock().unwrap().clear();
            Ok(())
        }
        fn try_clone(&self) -> serialport::Result<Box<dyn serialport::SerialPort>> {
            Err(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "mock ports cannot be cloned",
            ))
        }
        fn set_break(&self) -> serialport::Result<()> {
            Ok(())
        }
        fn clear_break(&self) -> serialport::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockPort;
    use super::*;

    #[test]
    fn read_exact_assembles_bytes_across_short_reads() {
        let port = MockPort::new(vec![0x02, 0x03, 0x06, 0x33]);
        let link = SerialLink::from_port(Box::new(port));

        let bytes = link.read_exact(4, Instant::now() + Duration::from_millis(200)).unwrap();
        assert_eq!(bytes, vec![0x02, 0x03, 0x06, 0x33]);
    }

    #[test]
    fn read_exact_times_out_when_deadline_passes_first() {
        let port = MockPort::new(vec![0x02]);
        let link = SerialLink::from_port(Box::new(port));

        let result = link.read_exact(4, Instant::now() + Duration::from_millis(20));
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), crate::error::ErrorCode::Timeout);
    }

    #[test]
    fn write_reaches_the_port() {
        let port = MockPort::new(vec![]);
        let raw = Box::new(port);
        let link = SerialLink::from_port(raw);
        link.write(&[0x02, 0x03, 0x06, 0x33]).unwrap();
    }
}
