//! Helpers for running child processes with deadlines and bounded output.
//!
//! stdout and stderr are drained on reader threads and forwarded over a channel,
//! so the caller sees one combined stream in arrival order and can feed it to a
//! single-threaded consumer while the child is still running.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured combined output of a finished (or killed) child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    /// stdout and stderr interleaved in arrival order.
    pub output: String,
    pub truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Output of a process that exited normally with `exit_code`.
    pub fn exited(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            success: exit_code == 0,
            output: output.into(),
            truncated: 0,
            timed_out: false,
        }
    }

    /// One-line notice for output that exceeded the capture limit.
    pub fn truncated_notice(&self, label: &str) -> Option<String> {
        (self.truncated > 0)
            .then(|| format!("[{label} output truncated {} bytes]", self.truncated))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Run a command to completion (or `timeout`) and capture its combined output.
pub fn run_command(cmd: Command, timeout: Duration, output_limit_bytes: usize) -> Result<CommandOutput> {
    run_command_streaming(cmd, timeout, output_limit_bytes, &mut |_: &str| {})
}

/// Run a command, handing each decoded chunk of output to `on_chunk` as it arrives.
///
/// The child is killed once `timeout` elapses and the result is marked
/// `timed_out`. `output_limit_bytes` bounds what is kept in memory; `on_chunk`
/// still sees everything.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_streaming(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    on_chunk: &mut dyn FnMut(&str),
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {}", cmd.get_program().to_string_lossy()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    let stdout_tx = tx.clone();
    let stdout_handle = thread::spawn(move || forward_chunks(stdout, Stream::Stdout, stdout_tx));
    let stderr_handle = thread::spawn(move || forward_chunks(stderr, Stream::Stderr, tx));

    let deadline = Instant::now() + timeout;
    let mut capture = Capture::new(output_limit_bytes);
    let mut stdout_decoder = Utf8Decoder::default();
    let mut stderr_decoder = Utf8Decoder::default();
    let mut timed_out = false;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((stream, bytes)) => {
                let decoder = match stream {
                    Stream::Stdout => &mut stdout_decoder,
                    Stream::Stderr => &mut stderr_decoder,
                };
                let text = decoder.decode(&bytes);
                if !text.is_empty() {
                    on_chunk(&text);
                    capture.push(&text);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for text in [stdout_decoder.finish(), stderr_decoder.finish()] {
        if !text.is_empty() {
            on_chunk(&text);
            capture.push(&text);
        }
    }

    let status = if timed_out {
        None
    } else {
        let remaining = deadline.saturating_duration_since(Instant::now());
        child.wait_timeout(remaining).context("wait for command")?
    };

    let status = match status {
        Some(status) => {
            join_reader(stdout_handle).context("join stdout")?;
            join_reader(stderr_handle).context("join stderr")?;
            status
        }
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            // Reader threads are left to finish on their own: grandchildren may
            // still hold the pipes open.
            child.wait().context("wait command after kill")?
        }
    };

    if capture.truncated > 0 {
        warn!(truncated = capture.truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        exit_code: status.code(),
        success: status.success() && !timed_out,
        output: capture.buf,
        truncated: capture.truncated,
        timed_out,
    })
}

fn forward_chunks<R: Read>(
    mut reader: R,
    stream: Stream,
    tx: Sender<(Stream, Vec<u8>)>,
) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        if tx.send((stream, chunk[..n].to_vec())).is_err() {
            // Receiver gave up (deadline passed); nothing left to deliver to.
            return Ok(());
        }
    }
}

fn join_reader(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Output kept in memory, bounded by a byte limit.
struct Capture {
    buf: String,
    limit: usize,
    truncated: usize,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
            truncated: 0,
        }
    }

    fn push(&mut self, text: &str) {
        let remaining = self.limit.saturating_sub(self.buf.len());
        if remaining >= text.len() {
            self.buf.push_str(text);
            return;
        }
        let mut keep = remaining;
        while keep > 0 && !text.is_char_boundary(keep) {
            keep -= 1;
        }
        self.buf.push_str(&text[..keep]);
        self.truncated += text.len() - keep;
    }
}

/// Decodes a byte stream as UTF-8, holding back sequences split across reads.
#[derive(Debug, Default)]
struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let split = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => self.carry.len(),
        };
        let rest = self.carry.split_off(split);
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry = rest;
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_holds_back_split_multibyte_sequence() {
        let glyph = "✅".as_bytes();
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'a', glyph[0]]), "a");
        assert_eq!(decoder.decode(&glyph[1..]), "✅");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'x', 0xff, b'y']), "x\u{fffd}y");
    }

    #[test]
    fn capture_truncates_on_char_boundary() {
        let mut capture = Capture::new(4);
        capture.push("ab✅cd");
        assert_eq!(capture.buf, "ab");
        assert_eq!(capture.truncated, "✅cd".len());
    }

    #[test]
    fn exited_constructor_sets_success() {
        assert!(CommandOutput::exited(0, "").success);
        assert!(!CommandOutput::exited(2, "").success);
    }

    #[cfg(unix)]
    #[test]
    fn streams_combined_output() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'out\\n'; printf 'err\\n' 1>&2; exit 3");
        let mut chunks = String::new();
        let out = run_command_streaming(cmd, Duration::from_secs(10), 1024, &mut |c: &str| {
            chunks.push_str(c);
        })
        .expect("run");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success);
        assert!(!out.timed_out);
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err\n"));
        assert_eq!(chunks.len(), out.output.len());
    }

    #[cfg(unix)]
    #[test]
    fn kills_command_after_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let out = run_command(cmd, Duration::from_millis(200), 1024).expect("run");
        assert!(out.timed_out);
        assert!(!out.success);
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let cmd = Command::new("testgate-definitely-not-a-binary");
        assert!(run_command(cmd, Duration::from_secs(1), 1024).is_err());
    }
}
