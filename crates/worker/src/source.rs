//! Newline-delimited message intake.
//!
//! Each line is one queue message body. Lines are read on a dedicated OS
//! thread so a blocked read never holds up runtime shutdown.

use std::io::BufRead;
use std::thread;

use tokio::sync::mpsc;

/// Buffered messages between the reader thread and the consumer.
pub const MESSAGE_BUFFER: usize = 16;

/// Spawn a thread that forwards lines from `reader` into a channel.
///
/// Line terminators (`\n` or `\r\n`) are stripped. The channel closes at
/// EOF, on a read error, or once the receiver is dropped.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<Vec<u8>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);

    let spawned = thread::Builder::new()
        .name("queue-reader".into())
        .spawn(move || forward_lines(reader, tx));
    if let Err(e) = spawned {
        tracing::error!(error = %e, "Failed to start queue reader thread");
    }

    rx
}

/// Read lines from stdin. See [`spawn_line_reader`].
pub fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
}

fn forward_lines<R: BufRead>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                tracing::info!("Queue input reached EOF");
                return;
            }
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                if tx.blocking_send(line).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read queue input");
                return;
            }
        }
    }
}
