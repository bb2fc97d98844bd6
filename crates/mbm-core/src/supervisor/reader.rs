//! Reader threads turning a child's output pipe into queued lines.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc::SyncSender;
use std::thread;

use tracing::{debug, trace};

/// Reads `stream` line by line on a dedicated thread and pushes each line
/// into `tx` until EOF, a read error, or the receiver going away.
///
/// Lines are decoded lossily and stripped of `\n` / `\r\n`. A final line
/// without a newline is still delivered.
pub(super) fn spawn_reader<R>(name: String, stream: R, tx: SyncSender<String>) -> io::Result<()>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || read_lines(&name, stream, &tx))?;
    Ok(())
}

fn read_lines<R: Read>(name: &str, stream: R, tx: &SyncSender<String>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);
    let mut count: u64 = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(reader = name, error = %e, "output read failed");
                break;
            }
        }

        let line = decode_line(&buf);
        trace!(reader = name, line = %line, "output line");
        if tx.send(line).is_err() {
            // Receiver dropped: nobody is consuming any more.
            break;
        }
        count += 1;
    }

    debug!(reader = name, lines = count, "output stream closed");
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
