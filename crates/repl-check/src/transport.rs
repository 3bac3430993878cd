//! Bidirectional byte channel to the child REPL.
//!
//! Two wirings are supported, selected at construction time:
//!
//! - **PTY**: the child's stdio is the slave side of a pseudo-terminal, so
//!   `readline`-style interactive editing works and the line discipline
//!   echoes input back with CR+LF endings. The window size is fixed large
//!   ([`PTY_COLS`] x [`PTY_ROWS`]) so readline never wraps a long form and
//!   starts emitting VT escape sequences.
//! - **Pipes**: plain pipes with stderr merged into stdout. No echo occurs
//!   and the child emits bare LF endings; [`Transport::lf_to_crlf`] tells
//!   the reader to canonicalize them so comparison logic sees CR+LF in both
//!   modes.
//!
//! The transport owns the child and terminates its whole process group on
//! every exit path, including drop.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::pin::Pin;
use std::process::{Child, Command, Stdio};
use std::task::{Context, Poll};

use rustix::fs::{OFlags, fcntl_setfl};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

use crate::config::{HarnessConfig, PTY_COLS, PTY_ROWS, TransportMode};
use crate::error::{HarnessError, Result};

/// Async stream over a raw non-blocking file descriptor.
///
/// Wraps the fd in a tokio [`AsyncFd`] and retries on `EAGAIN`, the same
/// readiness loop a PTY master needs. A PTY master read that fails with
/// `EIO` after the child exits is reported as EOF.
pub struct FdStream {
    inner: AsyncFd<OwnedFd>,
}

impl FdStream {
    /// Wrap an owned fd, switching it to non-blocking mode.
    pub fn new(fd: OwnedFd) -> Result<Self> {
        fcntl_setfl(&fd, OFlags::NONBLOCK)
            .map_err(|e| HarnessError::io_context("setting fd non-blocking", e.into()))?;
        let inner = AsyncFd::new(fd)
            .map_err(|e| HarnessError::io_context("registering fd with the runtime", e))?;
        Ok(Self { inner })
    }
}

impl std::fmt::Debug for FdStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdStream")
            .field("fd", &self.inner.get_ref().as_raw_fd())
            .finish()
    }
}

impl AsyncRead for FdStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = match self.inner.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };

            let unfilled = buf.initialize_unfilled();
            match rustix::io::read(self.inner.get_ref(), unfilled) {
                Ok(n) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Err(rustix::io::Errno::AGAIN) => {
                    guard.clear_ready();
                }
                // A PTY master raises EIO once the slave side is gone.
                Err(rustix::io::Errno::IO) => return Poll::Ready(Ok(())),
                Err(e) => {
                    return Poll::Ready(Err(io::Error::from_raw_os_error(e.raw_os_error())));
                }
            }
        }
    }
}

impl AsyncWrite for FdStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = match self.inner.poll_write_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };

            match rustix::io::write(self.inner.get_ref(), buf) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(rustix::io::Errno::AGAIN) => {
                    guard.clear_ready();
                }
                Err(e) => {
                    return Poll::Ready(Err(io::Error::from_raw_os_error(e.raw_os_error())));
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Owns the child and guarantees its process group is terminated.
struct ChildGuard {
    child: Child,
    terminated: bool,
}

impl ChildGuard {
    const fn new(child: Child) -> Self {
        Self {
            child,
            terminated: false,
        }
    }

    /// SIGTERM the whole process group and reap the direct child if it has
    /// already exited. Idempotent.
    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        let pgid = self.child.id() as i32;
        debug!(pgid, "terminating child process group");
        // SAFETY: killpg on a pgid we created; an error (group already gone)
        // is ignored.
        unsafe {
            libc::killpg(pgid, libc::SIGTERM);
        }
        let _ = self.child.try_wait();
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// A running child plus the byte channel to it.
pub struct Transport {
    reader: Box<dyn AsyncRead + Unpin + Send>,
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    mode: TransportMode,
    guard: ChildGuard,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("mode", &self.mode)
            .field("pid", &self.guard.child.id())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Spawn `command` (program plus arguments) under the configured
    /// transport mode.
    ///
    /// Must be called from within a tokio runtime; the channel fds are
    /// registered with it.
    pub fn spawn(command: &[String], config: &HarnessConfig) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| HarnessError::spawn("empty child command line"))?;

        let mut cmd = Command::new(program);
        cmd.args(args).env_clear().envs(config.effective_env());
        if let Some(dir) = &config.rundir {
            cmd.current_dir(dir);
        }

        match config.mode {
            TransportMode::Pty => Self::spawn_pty(cmd, config.mode),
            TransportMode::Pipe => Self::spawn_pipe(cmd, config.mode),
        }
    }

    /// Attach the child to the slave side of a fresh pseudo-terminal.
    fn spawn_pty(mut cmd: Command, mode: TransportMode) -> Result<Self> {
        let (master, slave) = openpty_with_winsize(PTY_COLS, PTY_ROWS)?;

        let stdio = |fd: &OwnedFd| -> Result<Stdio> {
            let dup = fd
                .try_clone()
                .map_err(|e| HarnessError::io_context("duplicating slave fd", e))?;
            Ok(Stdio::from(dup))
        };
        cmd.stdin(stdio(&slave)?);
        cmd.stdout(stdio(&slave)?);
        cmd.stderr(Stdio::from(slave));

        // SAFETY: setsid and ioctl are async-signal-safe; the closure runs
        // in the forked child after its stdio has been wired to the slave,
        // so fd 0 is the slave and becomes the controlling terminal.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| HarnessError::spawn(format!("{}: {e}", cmd.get_program().to_string_lossy())))?;
        debug!(pid = child.id(), "spawned child on pty");

        // Reads and writes share the master; keep separate fds so the halves
        // can be boxed independently.
        let write_fd = master
            .try_clone()
            .map_err(|e| HarnessError::io_context("duplicating pty master", e))?;
        Ok(Self {
            reader: Box::new(FdStream::new(master)?),
            writer: Box::new(FdStream::new(write_fd)?),
            mode,
            guard: ChildGuard::new(child),
        })
    }

    /// Attach the child to plain pipes, stderr merged into stdout.
    fn spawn_pipe(mut cmd: Command, mode: TransportMode) -> Result<Self> {
        let (read_end, write_end) = rustix::pipe::pipe()
            .map_err(|e| HarnessError::io_context("creating output pipe", e.into()))?;
        let stderr_end = write_end
            .try_clone()
            .map_err(|e| HarnessError::io_context("duplicating output pipe", e))?;

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::from(write_end));
        cmd.stderr(Stdio::from(stderr_end));
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| HarnessError::spawn(format!("{}: {e}", cmd.get_program().to_string_lossy())))?;
        debug!(pid = child.id(), "spawned child on pipes");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::spawn("child stdin was not captured"))?;
        Ok(Self {
            reader: Box::new(FdStream::new(read_end)?),
            writer: Box::new(FdStream::new(OwnedFd::from(stdin))?),
            mode,
            guard: ChildGuard::new(child),
        })
    }

    /// Build a transport from pre-existing halves. Used by tests that stand
    /// in a mock channel for a real child.
    #[cfg(test)]
    pub(crate) fn from_parts<R, W>(reader: R, writer: W, mode: TransportMode, child: Child) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            mode,
            guard: ChildGuard::new(child),
        }
    }

    /// Whether bare LF line endings from the child must be rewritten to
    /// CR+LF before buffering. True in pipe mode; a PTY's line discipline
    /// already emits CR+LF.
    #[must_use]
    pub const fn lf_to_crlf(&self) -> bool {
        matches!(self.mode, TransportMode::Pipe)
    }

    /// The child's process ID (also its process group ID).
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.guard.child.id()
    }

    /// The byte source the prompt reader drains.
    pub fn reader_mut(&mut self) -> &mut (dyn AsyncRead + Unpin + Send) {
        &mut *self.reader
    }

    /// Send one input line to the child, with the trailing newline, as a
    /// single write.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.writer
            .write_all(&data)
            .await
            .map_err(|e| HarnessError::io_context("writing to child", e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| HarnessError::io_context("flushing child input", e))?;
        Ok(())
    }

    /// Terminate the child's process group. Also happens on drop.
    pub fn terminate(&mut self) {
        self.guard.terminate();
    }
}

/// Open a PTY pair with a fixed window size, returning (master, slave).
fn openpty_with_winsize(cols: u16, rows: u16) -> Result<(OwnedFd, OwnedFd)> {
    let mut master: libc::c_int = 0;
    let mut slave: libc::c_int = 0;
    let mut winsize = libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: openpty is called with valid pointers to stack locals; the
    // null name/termios pointers are allowed per POSIX. On success both fds
    // are fresh and owned by us.
    let rc = unsafe {
        libc::openpty(
            &raw mut master,
            &raw mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &raw mut winsize,
        )
    };
    if rc != 0 {
        return Err(HarnessError::spawn(format!(
            "openpty failed: {}",
            io::Error::last_os_error()
        )));
    }

    // SAFETY: openpty succeeded, so both fds are valid and unowned.
    unsafe { Ok((OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave))) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use tokio::io::AsyncReadExt;

    fn cmd(mode: TransportMode, argv: &[&str]) -> Transport {
        let argv: Vec<String> = argv.iter().map(|s| (*s).to_string()).collect();
        Transport::spawn(&argv, &HarnessConfig::new(mode)).expect("spawn failed")
    }

    async fn read_some(transport: &mut Transport) -> String {
        let mut buf = [0u8; 4096];
        let n = transport
            .reader_mut()
            .read(&mut buf)
            .await
            .expect("read failed");
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn pipe_mode_captures_stdout() {
        let mut transport = cmd(TransportMode::Pipe, &["/bin/echo", "hello"]);
        assert!(transport.lf_to_crlf());
        let out = read_some(&mut transport).await;
        assert_eq!(out, "hello\n");
    }

    #[tokio::test]
    async fn pipe_mode_merges_stderr() {
        let mut transport = cmd(
            TransportMode::Pipe,
            &["/bin/sh", "-c", "echo oops 1>&2"],
        );
        let out = read_some(&mut transport).await;
        assert_eq!(out, "oops\n");
    }

    #[tokio::test]
    async fn pipe_mode_round_trip() {
        let mut transport = cmd(TransportMode::Pipe, &["/bin/cat"]);
        transport.write_line("ping").await.expect("write failed");
        let out = read_some(&mut transport).await;
        assert_eq!(out, "ping\n");
    }

    #[tokio::test]
    async fn pty_mode_emits_crlf() {
        let mut transport = cmd(TransportMode::Pty, &["/bin/echo", "hello"]);
        assert!(!transport.lf_to_crlf());
        let out = read_some(&mut transport).await;
        assert_eq!(out, "hello\r\n");
    }

    #[tokio::test]
    async fn pty_window_size_is_fixed_large() {
        let mut transport = cmd(TransportMode::Pty, &["/bin/sh", "-c", "stty size"]);
        let out = read_some(&mut transport).await;
        assert_eq!(out.trim(), format!("{PTY_ROWS} {PTY_COLS}"));
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let mut transport = cmd(TransportMode::Pipe, &["/bin/sleep", "30"]);
        transport.terminate();
        transport.terminate();
    }

    #[test]
    fn empty_command_line_is_rejected() {
        let result = Transport::spawn(&[], &HarnessConfig::default());
        assert!(result.is_err());
    }
}
