use std::io::{self, Read};

use encoding_rs::{Decoder, DecoderResult, Encoding};

use crate::constants::pipeline::DECODE_CHUNK_BYTES;
use crate::errors::IngestError;

/// Resolve a WHATWG encoding label (`utf-8`, `latin1`, `windows-1252`, ...).
///
/// `latin1` resolves to windows-1252, which maps every byte and never fails.
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding, IngestError> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
        IngestError::Configuration(format!("unknown character encoding label '{label}'"))
    })
}

/// Streaming byte-to-UTF-8 adapter.
///
/// Raw bytes are pulled in fixed-size chunks and decoded without replacement:
/// a malformed sequence surfaces as an [`io::ErrorKind::InvalidData`] error
/// instead of being silently replaced, so callers can retry with another
/// encoding. Text decoded before the bad sequence is still delivered first,
/// which keeps line-oriented callers accurate about where decoding broke.
/// A leading BOM for the chosen encoding is removed.
pub struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    encoding: &'static Encoding,
    raw: Vec<u8>,
    decoded: String,
    pos: usize,
    finished: bool,
    failure: Option<String>,
}

impl<R: Read> DecodingReader<R> {
    /// Wrap `inner`, decoding it as `encoding`.
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder_with_bom_removal(),
            encoding,
            raw: vec![0; DECODE_CHUNK_BYTES],
            decoded: String::new(),
            pos: 0,
            finished: false,
            failure: None,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        self.decoded.clear();
        self.pos = 0;
        let read = loop {
            match self.inner.read(&mut self.raw) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        };
        let last = read == 0;
        let mut consumed = 0;
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length_without_replacement(read - consumed)
                .ok_or_else(|| io::Error::other("decode buffer size overflow"))?;
            self.decoded.reserve(needed);
            let (result, used) = self.decoder.decode_to_string_without_replacement(
                &self.raw[consumed..read],
                &mut self.decoded,
                last,
            );
            consumed += used;
            match result {
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => continue,
                DecoderResult::Malformed(_, _) => {
                    self.failure = Some(format!(
                        "malformed {} byte sequence",
                        self.encoding.name()
                    ));
                    return Ok(());
                }
            }
        }
        if last {
            self.finished = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let pending = &self.decoded.as_bytes()[self.pos..];
            if !pending.is_empty() {
                let count = pending.len().min(buf.len());
                buf[..count].copy_from_slice(&pending[..count]);
                self.pos += count;
                return Ok(count);
            }
            if let Some(reason) = self.failure.take() {
                self.finished = true;
                return Err(io::Error::new(io::ErrorKind::InvalidData, reason));
            }
            if self.finished {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode_all(bytes: &[u8], label: &str) -> io::Result<String> {
        let encoding = resolve_encoding(label).unwrap();
        let mut reader = DecodingReader::new(Cursor::new(bytes.to_vec()), encoding);
        let mut out = String::new();
        reader.read_to_string(&mut out)?;
        Ok(out)
    }

    #[test]
    fn utf8_bom_is_removed() {
        let text = decode_all(b"\xEF\xBB\xBFIMEI,MODELO\n1,A\n", "utf-8").unwrap();
        assert_eq!(text, "IMEI,MODELO\n1,A\n");
    }

    #[test]
    fn latin1_bytes_fail_as_utf8_and_decode_as_latin1() {
        let bytes = b"IMEI,OBSERVA\xC7\xC3O\n1,ok\n";
        let err = decode_all(bytes, "utf-8").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let text = decode_all(bytes, "latin1").unwrap();
        assert!(text.starts_with("IMEI,OBSERVAÇÃO"));
    }

    #[test]
    fn multibyte_sequences_split_across_chunks_decode() {
        let mut input = "a".repeat(DECODE_CHUNK_BYTES - 1);
        input.push('ç');
        input.push_str("tail");
        let text = decode_all(input.as_bytes(), "utf-8").unwrap();
        assert_eq!(text, input);
    }

    #[test]
    fn text_before_a_malformed_sequence_is_delivered_first() {
        let encoding = resolve_encoding("utf-8").unwrap();
        let mut reader = DecodingReader::new(Cursor::new(b"ok\n\xFFbad".to_vec()), encoding);
        let mut buf = [0u8; 16];
        let read = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..read], b"ok\n");
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_sequence_at_eof_is_malformed() {
        let err = decode_all(b"abc\xC3", "utf-8").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_labels_are_rejected() {
        assert!(matches!(
            resolve_encoding("not-an-encoding"),
            Err(IngestError::Configuration(_))
        ));
        assert_eq!(resolve_encoding("latin1").unwrap().name(), "windows-1252");
    }
}
