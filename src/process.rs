//! Child processes as media streams.
//!
//! A spawned child's stdout becomes a [`MediaStream`]. When an input stream is
//! given, a feeder task copies it into the child's stdin one chunk at a time,
//! so a slow reader of stdout stalls the child, which stalls the feeder, which
//! stops pulling from upstream. Nothing is buffered beyond the OS pipes.
//!
//! The returned stream owns the child (`kill_on_drop`) and the feeder task
//! (aborted on drop). Dropping it mid-flight therefore kills the child and
//! drops the upstream stream, which recursively tears down its own process.

use std::{io, process::Stdio};

use bytes::Bytes;
use futures::{StreamExt, stream};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, Command},
    time::{Duration, timeout},
};
use tokio_util::{io::ReaderStream, task::AbortOnDropHandle};
use tracing::{debug, warn};

use crate::media::{MediaStream, StageTag, StreamError};

/// How long to wait for helper tasks once the child has exited.
const SETTLE_GRACE: Duration = Duration::from_secs(2);

/// Spawns `command` and exposes its stdout as a stream.
///
/// A non-zero exit status is reported as a final stream error carrying the
/// last line the child wrote to stderr.
pub fn spawn_stream(
    mut command: Command,
    label: &'static str,
    stage: StageTag,
    input: Option<MediaStream>,
) -> io::Result<MediaStream> {
    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other(format!("{label} stdout was not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other(format!("{label} stderr was not captured")))?;

    let feeder = match input {
        Some(input) => {
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| io::Error::other(format!("{label} stdin was not captured")))?;
            Some(AbortOnDropHandle::new(tokio::spawn(feed_stdin(
                input, stdin, label,
            ))))
        }
        None => None,
    };

    debug!(process = label, pid = child.id(), "spawned child process");

    let output = ChildOutput {
        stdout: ReaderStream::new(stdout),
        child,
        stderr_tail: Some(AbortOnDropHandle::new(tokio::spawn(drain_stderr(
            stderr, label,
        )))),
        feeder,
        label,
        stage,
        finished: false,
    };

    Ok(stream::unfold(output, ChildOutput::next_chunk).boxed())
}

struct ChildOutput {
    stdout: ReaderStream<tokio::process::ChildStdout>,
    child: Child,
    stderr_tail: Option<AbortOnDropHandle<String>>,
    feeder: Option<AbortOnDropHandle<io::Result<()>>>,
    label: &'static str,
    stage: StageTag,
    finished: bool,
}

impl ChildOutput {
    async fn next_chunk(mut self) -> Option<(io::Result<Bytes>, Self)> {
        if self.finished {
            return None;
        }

        match self.stdout.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), self)),
            Some(Err(error)) => {
                self.finished = true;
                let error =
                    (self.stage)(format!("reading {} output: {error}", self.label)).into_io();
                Some((Err(error), self))
            }
            None => {
                self.finished = true;
                match self.finish().await {
                    Ok(()) => None,
                    Err(error) => Some((Err(error), self)),
                }
            }
        }
    }

    /// Resolves the outcome once stdout is exhausted. An upstream failure
    /// seen by the feeder wins over the child's own exit status, since a
    /// truncated input usually makes the child exit cleanly.
    async fn finish(&mut self) -> io::Result<()> {
        let status = self.child.wait().await?;

        if let Some(feeder) = self.feeder.take() {
            match timeout(SETTLE_GRACE, feeder).await {
                Ok(Ok(Err(error))) => return Err(error),
                Ok(Err(join_error)) => return Err(io::Error::other(join_error)),
                Ok(Ok(Ok(()))) | Err(_) => {}
            }
        }

        if status.success() {
            debug!(process = self.label, "child process finished");
            return Ok(());
        }

        let tail = match self.stderr_tail.take() {
            Some(handle) => timeout(SETTLE_GRACE, handle)
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
            None => String::new(),
        };
        let message = if tail.is_empty() {
            format!("{} exited with {status}", self.label)
        } else {
            format!("{} exited with {status}: {tail}", self.label)
        };

        Err((self.stage)(message).into_io())
    }
}

impl Drop for ChildOutput {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                process = self.label,
                pid = self.child.id(),
                "stream dropped before completion, killing child process"
            );
        }
    }
}

async fn feed_stdin(
    mut input: MediaStream,
    mut stdin: ChildStdin,
    label: &'static str,
) -> io::Result<()> {
    while let Some(chunk) = input.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                warn!(process = label, "upstream stream failed: {error}");
                return Err(error);
            }
        };

        if let Err(error) = stdin.write_all(&chunk).await {
            // The child closed its input early; its exit status says why.
            debug!(process = label, "stopped feeding stdin: {error}");
            return Ok(());
        }
    }

    if let Err(error) = stdin.shutdown().await {
        debug!(process = label, "closing stdin: {error}");
    }

    Ok(())
}

async fn drain_stderr(stderr: ChildStderr, label: &'static str) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut last = String::new();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                debug!(process = label, "{line}");
                last = line.to_string();
            }
            Ok(None) => break,
            Err(error) => {
                debug!(process = label, "stopped reading stderr: {error}");
                break;
            }
        }
    }

    last
}

#[cfg(all(test, unix))]
mod tests {
    use std::{
        pin::Pin,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        task::{Context, Poll},
    };

    use futures::Stream;

    use super::*;

    struct DropFlag {
        inner: MediaStream,
        dropped: Arc<AtomicBool>,
    }

    impl Stream for DropFlag {
        type Item = io::Result<Bytes>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inner.poll_next_unpin(cx)
        }
    }

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn chunks(parts: &[&'static [u8]]) -> MediaStream {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(part)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(mut output: MediaStream) -> (Vec<u8>, Option<io::Error>) {
        let mut bytes = Vec::new();
        while let Some(item) = output.next().await {
            match item {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(error) => return (bytes, Some(error)),
            }
        }
        (bytes, None)
    }

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn filter_passes_input_through_child() {
        let output = spawn_stream(
            Command::new("cat"),
            "cat",
            StreamError::Transcoding,
            Some(chunks(&[b"hello ", b"media ", b"world"])),
        )
        .unwrap();

        let (bytes, error) = collect(output).await;
        assert!(error.is_none());
        assert_eq!(bytes, b"hello media world");
    }

    #[tokio::test]
    async fn non_zero_exit_becomes_tagged_error_with_stderr_tail() {
        let output = spawn_stream(
            shell("printf 'partial'; echo 'ERROR: boom' >&2; exit 3"),
            "sh",
            StreamError::Extraction,
            None,
        )
        .unwrap();

        let (bytes, error) = collect(output).await;
        assert_eq!(bytes, b"partial");
        let error = error.expect("exit status should surface as an error");
        match StreamError::from_io(&error) {
            Some(StreamError::Extraction(message)) => {
                assert!(message.contains("ERROR: boom"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn upstream_failure_wins_over_clean_exit() {
        let input = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(StreamError::Extraction("source went away".to_string()).into_io()),
        ])
        .boxed();

        let output =
            spawn_stream(Command::new("cat"), "cat", StreamError::Transcoding, Some(input))
                .unwrap();

        let (bytes, error) = collect(output).await;
        assert_eq!(bytes, b"abc");
        let error = error.expect("upstream error should surface");
        assert!(matches!(
            StreamError::from_io(&error),
            Some(StreamError::Extraction(message)) if message == "source went away"
        ));
    }

    #[tokio::test]
    async fn dropping_output_tears_down_upstream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let input = DropFlag {
            inner: stream::iter(vec![Ok(Bytes::from_static(b"first"))])
                .chain(stream::pending())
                .boxed(),
            dropped: Arc::clone(&dropped),
        }
        .boxed();

        let mut output =
            spawn_stream(Command::new("cat"), "cat", StreamError::Transcoding, Some(input))
                .unwrap();

        let first = output.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"first");
        assert!(!dropped.load(Ordering::SeqCst));

        drop(output);

        timeout(Duration::from_secs(5), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("upstream stream should be dropped after the output is dropped");
    }

    #[tokio::test]
    async fn missing_binary_fails_at_spawn() {
        let result = spawn_stream(
            Command::new("definitely-not-a-real-binary-tubeproxy"),
            "missing",
            StreamError::Transcoding,
            None,
        );
        let error = result.err().expect("spawn should fail");
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }
}
