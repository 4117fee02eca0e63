//! Out-of-band event channel between the subject and the harness.
//!
//! A named pipe inside a fresh temporary directory. A dedicated thread opens it
//! for reading (blocking until the subject attaches as the writer), reads one
//! line at a time and pushes each line, terminator included, onto an unbounded
//! FIFO queue. The orchestrating task dequeues lines one by one.
//!
//! The reader must already be waiting when the subject starts: the subject's
//! open-for-write blocks until a reader exists, so [`EventChannel::create`]
//! starts the drain thread before returning.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::error::{HarnessError, Result};

/// File name of the pipe inside the channel's temporary directory.
pub const PIPE_NAME: &str = "events";

enum Drained {
    Line(String),
    OpenFailed(io::Error),
    ReadFailed(io::Error),
}

pub struct EventChannel {
    path: PathBuf,
    lines: mpsc::UnboundedReceiver<Drained>,
    timeout: Option<Duration>,
    /// Set by the drain thread once its open-for-read has returned.
    attached: Arc<AtomicBool>,
    drain: JoinHandle<()>,
    // Removed on drop, after the pipe has been unblocked.
    _dir: TempDir,
}

impl EventChannel {
    /// Create the pipe and start draining it.
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("interpose-")
            .tempdir()
            .map_err(|source| HarnessError::ChannelFailure {
                path: std::env::temp_dir(),
                source,
            })?;
        let path = dir.path().join(PIPE_NAME);
        make_fifo(&path).map_err(|source| HarnessError::ChannelFailure {
            path: path.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let attached = Arc::new(AtomicBool::new(false));
        let drain_path = path.clone();
        let drain_attached = attached.clone();
        let drain = std::thread::Builder::new()
            .name("event-drain".to_string())
            .spawn(move || drain(&drain_path, &drain_attached, tx))
            .map_err(|source| HarnessError::ChannelFailure {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "event channel created");

        Ok(Self {
            path,
            lines: rx,
            timeout: None,
            attached,
            drain,
            _dir: dir,
        })
    }

    /// Bound every read by `timeout`. `None` blocks indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dequeue the next line, blocking until one arrives.
    pub async fn next_line(&mut self) -> Result<String> {
        self.recv(None).await
    }

    /// Dequeue the next line while waiting for `expected`, without
    /// comparing. A closed channel is reported against `expected`.
    pub async fn next_line_for(&mut self, expected: &str) -> Result<String> {
        self.recv(Some(expected)).await
    }

    /// Dequeue one line and require it to equal `expected` exactly.
    pub async fn expect_line(&mut self, expected: &str) -> Result<()> {
        let actual = self.recv(Some(expected)).await?;
        if actual != expected {
            return Err(HarnessError::ProtocolViolation {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Read the first line written by the subject: its listening port.
    pub async fn read_port(&mut self) -> Result<u16> {
        let line = self.recv(Some("<port>\n")).await?;
        line.trim_end()
            .parse::<u16>()
            .map_err(|_| HarnessError::ProtocolViolation {
                expected: "<decimal port>\n".to_string(),
                actual: line,
            })
    }

    async fn recv(&mut self, expected: Option<&str>) -> Result<String> {
        let message = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.lines.recv())
                .await
                .map_err(|_| HarnessError::EventTimeout(limit))?,
            None => self.lines.recv().await,
        };

        match message {
            Some(Drained::Line(line)) => {
                tracing::debug!(line = line.trim_end(), "event");
                Ok(line)
            }
            Some(Drained::OpenFailed(source)) => Err(HarnessError::ChannelFailure {
                path: self.path.clone(),
                source,
            }),
            Some(Drained::ReadFailed(e)) => Err(HarnessError::Io(e)),
            None => Err(HarnessError::ChannelClosed {
                expected: expected.map(str::to_string),
            }),
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        // Until the drain thread is past open() it is parked there or about
        // to be. A non-blocking writer only succeeds once it is parked, so
        // keep attaching and detaching one until it gets through; it then
        // reads end-of-stream and exits.
        while !self.attached.load(Ordering::Acquire) && !self.drain.is_finished() {
            let _ = OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.path);
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

fn make_fifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the whole call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn drain(path: &Path, attached: &AtomicBool, queue: mpsc::UnboundedSender<Drained>) {
    let opened = File::open(path);
    attached.store(true, Ordering::Release);
    let file = match opened {
        Ok(file) => file,
        Err(e) => {
            let _ = queue.send(Drained::OpenFailed(e));
            return;
        }
    };

    let mut reader = BufReader::new(file);
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if queue.send(Drained::Line(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = queue.send(Drained::ReadFailed(e));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_lines(
        path: PathBuf,
        lines: &'static str,
        hold: Duration,
    ) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let mut pipe = OpenOptions::new().write(true).open(path).unwrap();
            pipe.write_all(lines.as_bytes()).unwrap();
            pipe.flush().unwrap();
            std::thread::sleep(hold);
        })
    }

    #[tokio::test]
    async fn lines_arrive_in_order_with_terminators() {
        let mut channel = EventChannel::create().unwrap();
        let writer = write_lines(
            channel.path().to_path_buf(),
            "4242\nconnection\nresponse_finished\n",
            Duration::ZERO,
        );

        assert_eq!(channel.read_port().await.unwrap(), 4242);
        assert_eq!(channel.next_line().await.unwrap(), "connection\n");
        channel.expect_line("response_finished\n").await.unwrap();
        writer.join().unwrap();

        assert!(matches!(
            channel.next_line().await,
            Err(HarnessError::ChannelClosed { expected: None })
        ));
    }

    #[tokio::test]
    async fn mismatch_reports_both_lines() {
        let mut channel = EventChannel::create().unwrap();
        let writer = write_lines(
            channel.path().to_path_buf(),
            "connection_finished\n",
            Duration::ZERO,
        );

        match channel.expect_line("connection\n").await {
            Err(HarnessError::ProtocolViolation { expected, actual }) => {
                assert_eq!(expected, "connection\n");
                assert_eq!(actual, "connection_finished\n");
            }
            other => panic!("expected a protocol violation, got {other:?}"),
        }
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn non_numeric_port_line_is_a_violation() {
        let mut channel = EventChannel::create().unwrap();
        let writer = write_lines(channel.path().to_path_buf(), "connection\n", Duration::ZERO);
        assert!(matches!(
            channel.read_port().await,
            Err(HarnessError::ProtocolViolation { .. })
        ));
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn opt_in_timeout_fires_when_subject_is_silent() {
        let channel = EventChannel::create().unwrap();
        let writer = write_lines(channel.path().to_path_buf(), "", Duration::from_millis(300));
        let mut channel = channel.with_timeout(Some(Duration::from_millis(50)));

        assert!(matches!(
            channel.next_line().await,
            Err(HarnessError::EventTimeout(_))
        ));
        writer.join().unwrap();
    }

    #[test]
    fn each_channel_gets_its_own_directory() {
        let a = EventChannel::create().unwrap();
        let b = EventChannel::create().unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.path().parent(), b.path().parent());
        assert!(a.path().ends_with(PIPE_NAME));
    }

    #[test]
    fn dropping_an_unused_channel_removes_its_directory() {
        let channel = EventChannel::create().unwrap();
        let dir = channel.path().parent().unwrap().to_path_buf();
        assert!(dir.exists());
        drop(channel);
        assert!(!dir.exists());
    }
}
