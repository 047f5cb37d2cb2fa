//! Line draining for child process pipes.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Read `reader` to EOF, calling `on_line` for every line.
///
/// Lines are split on `\n` and decoded lossily, so stray non-UTF-8 bytes never
/// stop the stream. The trailing line terminator (`\n` or `\r\n`) is removed.
/// Returns the number of lines seen.
pub async fn drain_lines<R, F>(reader: R, mut on_line: F) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut lines = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            // EOF
            return Ok(lines);
        }

        let line = String::from_utf8_lossy(&buf);
        on_line(line.trim_end_matches('\n').trim_end_matches('\r'));
        lines += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn collect(data: &'static [u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let count = drain_lines(Cursor::new(data), |line| lines.push(line.to_string()))
            .await
            .unwrap();
        assert_eq!(count as usize, lines.len());
        lines
    }

    #[tokio::test]
    async fn splits_lines_and_strips_terminators() {
        assert_eq!(collect(b"a\nb\r\n\nc").await, ["a", "b", "", "c"]);
    }

    #[tokio::test]
    async fn empty_stream_has_no_lines() {
        assert!(collect(b"").await.is_empty());
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        assert_eq!(collect(b"ok\n\xff\xfe\nafter\n").await, ["ok", "\u{fffd}\u{fffd}", "after"]);
    }
}
