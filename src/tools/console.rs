//! Line-oriented terminal I/O shared by the REPL and the `interaction` tool.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

struct ConsoleIo {
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    writer: Box<dyn AsyncWrite + Unpin + Send>,
}

/// A prompt/reply console. Prompting holds the lock until the reply is read,
/// so concurrent prompts never interleave.
pub struct Console {
    io: Mutex<ConsoleIo>,
}

impl Console {
    /// Process stdin/stdout.
    pub fn stdio() -> Self {
        Self::from_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }

    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            io: Mutex::new(ConsoleIo {
                reader: Box::new(reader),
                writer: Box::new(writer),
            }),
        }
    }

    /// Write one line.
    pub async fn println(&self, line: &str) -> io::Result<()> {
        let mut io = self.io.lock().await;
        io.writer.write_all(line.as_bytes()).await?;
        io.writer.write_all(b"\n").await?;
        io.writer.flush().await
    }

    /// Show `prompt` and read one line. `None` on end of input.
    ///
    /// The trailing `\n` or `\r\n` is stripped; nothing else is.
    pub async fn prompt(&self, prompt: &str) -> io::Result<Option<String>> {
        let mut io = self.io.lock().await;
        io.writer.write_all(prompt.as_bytes()).await?;
        io.writer.flush().await?;

        let mut line = String::new();
        if io.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(strip_newline(line)))
    }
}

fn strip_newline(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex as StdMutex};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::AsyncWrite;

    /// Cloneable in-memory writer for asserting console output.
    #[derive(Clone, Default)]
    pub struct SharedBuf(pub Arc<StdMutex<Vec<u8>>>);

    impl SharedBuf {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl AsyncWrite for SharedBuf {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Console reading `input` and writing into the returned buffer.
    pub fn console(input: &str) -> (super::Console, SharedBuf) {
        let out = SharedBuf::default();
        let console = super::Console::from_io(
            std::io::Cursor::new(input.as_bytes().to_vec()),
            out.clone(),
        );
        (console, out)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::console;

    #[tokio::test]
    async fn test_prompt_strips_only_line_ending() {
        let (console, out) = console("  show slow queries \r\nsecond\n");
        assert_eq!(
            console.prompt(">> ").await.unwrap().as_deref(),
            Some("  show slow queries ")
        );
        assert_eq!(console.prompt(">> ").await.unwrap().as_deref(), Some("second"));
        assert_eq!(console.prompt(">> ").await.unwrap(), None);
        assert_eq!(out.contents(), ">> >> >> ");
    }

    #[tokio::test]
    async fn test_println() {
        let (console, out) = console("");
        console.println("[A] hello").await.unwrap();
        assert_eq!(out.contents(), "[A] hello\n");
    }
}
