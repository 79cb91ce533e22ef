//! Child process helpers shared by the FFmpeg decoder and encoder.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Bytes of stderr kept for error messages.
pub(crate) const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Read a child's stderr to the end on its own task.
///
/// A piped stderr that nobody reads fills up and stalls the child. The task
/// resolves to the last [`STDERR_TAIL_BYTES`] of output once the pipe closes.
pub(crate) fn drain_stderr<R>(mut stderr: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        let excess = tail.len() - STDERR_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_drain_keeps_tail() {
        let mut output = vec![b'x'; 3 * STDERR_TAIL_BYTES];
        output.extend_from_slice(b"final error line");

        let tail = drain_stderr(std::io::Cursor::new(output)).await.unwrap();
        assert_eq!(tail.len(), STDERR_TAIL_BYTES);
        assert!(tail.ends_with("final error line"));
    }

    #[tokio::test]
    async fn test_drain_short_output() {
        let tail = drain_stderr(&b"oops\n"[..]).await.unwrap();
        assert_eq!(tail, "oops\n");
    }

    #[tokio::test]
    async fn test_chatty_child_exits_while_drained() {
        // Far more than a pipe buffer holds; without a reader the child would block.
        let mut child = Command::new("sh")
            .args(["-c", "head -c 1000000 /dev/zero >&2; echo done >&2"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let drain = drain_stderr(child.stderr.take().unwrap());

        let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
            .await
            .expect("child stalled on a full stderr pipe")
            .unwrap();
        assert!(status.success());

        let tail = drain.await.unwrap();
        assert!(tail.len() <= STDERR_TAIL_BYTES);
        assert!(tail.ends_with("done\n"));
    }
}
