//! Mock transport for testing

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Transport;

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    responses: VecDeque<Vec<u8>>,
    closed: bool,
}

/// In-memory transport: reads drain injected bytes, queued responses are
/// released one per write, an empty buffer times out.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                write_buffer: Vec::new(),
                responses: VecDeque::new(),
                closed: false,
            })),
        }
    }

    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().unwrap().read_buffer.extend(data);
    }

    pub fn respond_with(&self, data: Vec<u8>) {
        self.inner.lock().unwrap().responses.push_back(data);
    }

    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }

    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().unwrap().write_buffer.clone()
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.read_buffer.len().min(buf.len());

        if n == 0 {
            if inner.closed {
                return Ok(0);
            }

            // stand in for a short blocking wait so polling loops don't spin
            drop(inner);
            std::thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(ErrorKind::TimedOut, "mock timeout"));
        }

        for item in buf.iter_mut().take(n) {
            *item = inner.read_buffer.pop_front().unwrap();
        }

        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        inner.write_buffer.extend_from_slice(data);
        if let Some(response) = inner.responses.pop_front() {
            inner.read_buffer.extend(response);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
