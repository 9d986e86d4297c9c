use crate::log::{error_write, Error};
use serde_json::{Map, Value};
use std::{
    borrow::Cow,
    fmt::{self, Display, Write},
    io,
};

/// Buffers rendered output as UTF-8 bytes, and passes it on to an optional
/// sink when flushed.
///
/// Output can be taken out of the buffer as a `String` or bytes at any time
/// without flushing. A [`FastWriter`] with a sink flushes itself when
/// dropped.
///
/// # Examples
///
/// ```
/// use macrame::FastWriter;
///
/// let mut sink = Vec::new();
/// let mut writer = FastWriter::with_sink(&mut sink);
/// writer.write_str("hello, ");
/// writer.write_bytes(b"world");
///
/// assert_eq!(writer.to_string(), "hello, world");
/// writer.close().unwrap();
///
/// assert_eq!(sink, b"hello, world");
/// ```
pub struct FastWriter<'sink> {
    buffer: Vec<u8>,
    sink: Option<&'sink mut dyn io::Write>,
}

impl FastWriter<'static> {
    /// Create a new [`FastWriter`] that only buffers.
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            sink: None,
        }
    }
}

impl Default for FastWriter<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'sink> FastWriter<'sink> {
    /// Create a new [`FastWriter`] that flushes into the given sink.
    pub fn with_sink(sink: &'sink mut dyn io::Write) -> Self {
        Self {
            buffer: Vec::new(),
            sink: Some(sink),
        }
    }

    #[inline]
    pub fn write_str(&mut self, text: &str) {
        self.buffer.extend_from_slice(text.as_bytes());
    }

    #[inline]
    pub fn write_char(&mut self, c: char) {
        let mut encoded = [0; 4];
        self.write_str(c.encode_utf8(&mut encoded));
    }

    /// Write text that is already encoded as UTF-8.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Write the text form of a [`Value`].
    pub fn write_value(&mut self, value: &Value) {
        self.write_str(&to_text(value));
    }

    /// Return the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Return a copy of the buffered bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer.clone()
    }

    /// Consume the writer and return the buffered bytes, without flushing.
    pub fn into_bytes(mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Move the buffered bytes into the sink, and flush the sink.
    ///
    /// Without a sink this does nothing, and the buffer is kept.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] of kind [`Io`][`crate::Kind::Io`] when the sink
    /// fails. Bytes that were already accepted by the sink are not returned
    /// to the buffer.
    pub fn flush(&mut self) -> Result<(), Error> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        sink.write_all(&self.buffer).map_err(error_write)?;
        self.buffer.clear();

        sink.flush().map_err(error_write)
    }

    /// Flush and release the sink.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the final flush fails.
    pub fn close(mut self) -> Result<(), Error> {
        let result = self.flush();
        self.sink = None;

        result
    }
}

impl Display for FastWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.buffer))
    }
}

impl Write for FastWriter<'_> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        FastWriter::write_str(self, s);
        Ok(())
    }

    #[inline]
    fn write_char(&mut self, c: char) -> fmt::Result {
        FastWriter::write_char(self, c);
        Ok(())
    }
}

impl Drop for FastWriter<'_> {
    fn drop(&mut self) {
        if self.sink.is_some() && !self.buffer.is_empty() {
            if let Err(error) = self.flush() {
                tracing::warn!(%error, "failed to flush output on drop");
            }
        }
    }
}

/// Return the text form of a [`Value`].
///
/// Strings are returned as they are and null is empty. Arrays are printed
/// as `[a, b]`, and objects as `{key: value}`.
pub fn to_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(string) => Cow::Borrowed(string),
        Value::Null => Cow::Borrowed(""),
        Value::Bool(boolean) => Cow::Owned(boolean.to_string()),
        Value::Number(number) => Cow::Owned(number.to_string()),
        Value::Array(array) => Cow::Owned(array_text(array)),
        Value::Object(object) => Cow::Owned(object_text(object)),
    }
}

fn array_text(array: &[Value]) -> String {
    let mut text = String::from("[");
    for (n, item) in array.iter().enumerate() {
        if n > 0 {
            text.push_str(", ");
        }
        text.push_str(&to_text(item));
    }
    text.push(']');

    text
}

fn object_text(object: &Map<String, Value>) -> String {
    let mut text = String::from("{");
    for (n, (key, value)) in object.iter().enumerate() {
        if n > 0 {
            text.push_str(", ");
        }
        let _ = write!(text, "{key}: {}", to_text(value));
    }
    text.push('}');

    text
}

#[cfg(test)]
mod tests {
    use super::{to_text, FastWriter};
    use serde_json::json;
    use std::io;

    #[test]
    fn test_to_text() {
        assert_eq!(to_text(&json!("plain")), "plain");
        assert_eq!(to_text(&json!(null)), "");
        assert_eq!(to_text(&json!(12)), "12");
        assert_eq!(to_text(&json!(false)), "false");
        assert_eq!(to_text(&json!([1, "a", [2]])), "[1, a, [2]]");
        assert_eq!(to_text(&json!({"a": 1})), "{a: 1}");
    }

    #[test]
    fn test_buffer_without_sink() -> Result<(), crate::Error> {
        let mut writer = FastWriter::new();
        writer.write_str("ab");
        writer.write_char('é');
        writer.write_value(&json!(3));
        writer.flush()?;

        assert_eq!(writer.to_string(), "abé3");
        assert_eq!(writer.len(), 5);
        assert_eq!(writer.into_bytes(), "abé3".as_bytes());

        Ok(())
    }

    #[test]
    fn test_flush_into_sink() -> Result<(), crate::Error> {
        let mut sink = Vec::new();
        {
            let mut writer = FastWriter::with_sink(&mut sink);
            writer.write_str("first ");
            writer.flush()?;
            assert!(writer.is_empty());
            writer.write_str("second");
        }

        assert_eq!(sink, b"first second");

        Ok(())
    }

    struct Broken;

    impl io::Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure() {
        let mut sink = Broken;
        let mut writer = FastWriter::with_sink(&mut sink);
        writer.write_str("lost");
        let error = writer.close().unwrap_err();

        assert_eq!(error.get_kind(), crate::Kind::Io);
    }
}
