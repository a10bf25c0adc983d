// In-memory text buffers that stand in for an engine's stdin and stdout.
use std::fmt;
use std::io;

/// Append-only byte buffer with line reads and a drain-and-clear operation.
#[derive(Debug, Default)]
pub struct TextChannel {
    buf: Vec<u8>,
}

impl TextChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `text` as input, terminating it with a newline when missing.
    pub fn feed(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
        if !text.is_empty() && !text.ends_with('\n') {
            self.buf.push(b'\n');
        }
    }

    /// Removes and returns the next line without its terminator.
    /// A trailing fragment without a newline counts as a line.
    pub fn read_line(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let (line_len, consumed) = match self.buf.iter().position(|byte| *byte == b'\n') {
            Some(index) => (index, index + 1),
            None => (self.buf.len(), self.buf.len()),
        };
        let mut line: Vec<u8> = self.buf.drain(..consumed).collect();
        line.truncate(line_len);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Returns everything buffered so far and leaves the channel empty.
    pub fn drain(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buf);
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl io::Write for TextChannel {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for TextChannel {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        self.buf.extend_from_slice(text.as_bytes());
        Ok(())
    }
}
