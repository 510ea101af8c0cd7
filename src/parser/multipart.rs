use crate::error::ProtocolError;
use bytes::{Buf, BytesMut};
use std::time::SystemTime;
use tracing::trace;

/// A complete multipart part observed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEvent {
    /// Payload length in bytes (headers excluded)
    pub length: usize,
    /// Wall-clock time the final byte of the part was parsed
    pub completed_at: SystemTime,
}

/// Memory bounds applied to a single part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    pub max_part_size: usize,
    pub max_header_size: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_part_size: 2 * 1024 * 1024,
            max_header_size: 8 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Skipping anything sent before the first delimiter
    Preamble,
    /// Between parts: only line breaks may precede the next delimiter
    Delimiter,
    /// Just consumed a delimiter; expecting CRLF or the closing `--`
    DelimiterLine,
    /// Reading the part header block
    Headers,
    /// Reading the payload, sized by Content-Length when the server sent one
    Body { content_length: Option<usize> },
    /// Closing delimiter seen; everything after it is ignored
    Finished,
    /// A protocol error was reported; input is discarded until reset
    Failed,
}

/// Incremental parser for `multipart/x-mixed-replace` bodies.
///
/// Bytes are pushed as they arrive from the network and complete parts are
/// pulled out with [`MultipartParser::next_frame`]. Part boundaries need not
/// line up with chunk boundaries. The accumulator never holds more than one
/// part plus one delimiter: oversized parts are reported once as
/// [`ProtocolError::PartTooLarge`] and the buffered bytes are released.
///
/// The delimiter is `--` followed by the boundary (RFC 2046). Many IP cameras
/// announce a boundary that already starts with `--` and then send it
/// verbatim; for such boundaries the form seen first in the preamble is used
/// for the rest of the stream.
#[derive(Debug)]
pub struct MultipartParser {
    /// Delimiter in effect for the current stream
    delimiter: Vec<u8>,
    /// Boundary sent without the extra `--`, tried when the RFC form is absent
    verbatim: Option<Vec<u8>>,
    limits: ParserLimits,
    buffer: BytesMut,
    phase: Phase,
    /// Offset into `buffer` already scanned for a delimiter in the current body
    scanned: usize,
    frames: u64,
}

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

impl MultipartParser {
    pub fn new(boundary: &str, limits: ParserLimits) -> Self {
        let verbatim = boundary
            .starts_with("--")
            .then(|| boundary.as_bytes().to_vec());

        Self {
            delimiter: rfc_delimiter(boundary),
            verbatim,
            limits,
            buffer: BytesMut::with_capacity(64 * 1024),
            phase: Phase::Preamble,
            scanned: 0,
            frames: 0,
        }
    }

    /// Append received bytes to the accumulator
    pub fn push(&mut self, chunk: &[u8]) {
        match self.phase {
            Phase::Failed | Phase::Finished => {}
            _ => self.buffer.extend_from_slice(chunk),
        }
    }

    /// Pull the next complete frame out of the accumulated bytes.
    ///
    /// Returns `Ok(None)` when more input is needed. After an error the parser
    /// stays inert until [`MultipartParser::reset`] is called.
    pub fn next_frame(&mut self) -> Result<Option<FrameEvent>, ProtocolError> {
        loop {
            let step = match self.phase {
                Phase::Preamble => self.seek_first_delimiter(),
                Phase::Delimiter => self.expect_delimiter(),
                Phase::DelimiterLine => self.finish_delimiter_line(),
                Phase::Headers => self.read_headers(),
                Phase::Body { content_length } => match self.read_body(content_length) {
                    Ok(Some(length)) => {
                        self.frames += 1;
                        trace!("Parsed multipart frame {} ({} bytes)", self.frames, length);
                        return Ok(Some(FrameEvent {
                            length,
                            completed_at: SystemTime::now(),
                        }));
                    }
                    Ok(None) => Ok(false),
                    Err(e) => Err(e),
                },
                Phase::Finished | Phase::Failed => return Ok(None),
            };

            match step {
                Ok(true) => continue,
                Ok(false) => return Ok(None),
                Err(e) => {
                    self.fail();
                    return Err(e);
                }
            }
        }
    }

    /// Discard all state so the parser can be reused for a new stream
    pub fn reset(&mut self) {
        if let Some(verbatim) = &self.verbatim {
            self.delimiter = [b"--".as_slice(), verbatim.as_slice()].concat();
        }
        self.buffer.clear();
        self.phase = Phase::Preamble;
        self.scanned = 0;
    }

    /// Frames parsed since creation
    pub fn frames_parsed(&self) -> u64 {
        self.frames
    }

    /// Bytes currently held in the accumulator
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True once the closing delimiter has been seen
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    fn fail(&mut self) {
        self.buffer = BytesMut::new();
        self.scanned = 0;
        self.phase = Phase::Failed;
    }

    fn seek_first_delimiter(&mut self) -> Result<bool, ProtocolError> {
        let mut found = find(&self.buffer, &self.delimiter, 0);

        if found.is_none() {
            if let Some(verbatim) = &self.verbatim {
                if let Some(pos) = find(&self.buffer, verbatim, 0) {
                    trace!("Boundary sent without RFC prefix, using it verbatim");
                    self.delimiter = verbatim.clone();
                    found = Some(pos);
                }
            }
        }

        match found {
            Some(pos) => {
                self.buffer.advance(pos + self.delimiter.len());
                self.phase = Phase::DelimiterLine;
                Ok(true)
            }
            None if self.buffer.len() > self.limits.max_header_size + self.delimiter.len() => {
                Err(ProtocolError::MalformedBoundary {
                    details: format!(
                        "no boundary found in first {} bytes",
                        self.buffer.len()
                    ),
                })
            }
            None => Ok(false),
        }
    }

    fn expect_delimiter(&mut self) -> Result<bool, ProtocolError> {
        let line_breaks = self
            .buffer
            .iter()
            .take_while(|b| **b == b'\r' || **b == b'\n')
            .count();
        self.buffer.advance(line_breaks);

        if self.buffer.len() < self.delimiter.len() {
            if self.delimiter.starts_with(&self.buffer) {
                return Ok(false);
            }
        } else if self.buffer.starts_with(&self.delimiter) {
            self.buffer.advance(self.delimiter.len());
            self.phase = Phase::DelimiterLine;
            return Ok(true);
        }

        Err(ProtocolError::MalformedBoundary {
            details: format!(
                "expected delimiter, found {:?}",
                String::from_utf8_lossy(&self.buffer[..self.buffer.len().min(16)])
            ),
        })
    }

    fn finish_delimiter_line(&mut self) -> Result<bool, ProtocolError> {
        // Transport padding (spaces and tabs) may follow the delimiter
        let padding = self
            .buffer
            .iter()
            .take_while(|b| **b == b' ' || **b == b'\t')
            .count();
        self.buffer.advance(padding);

        if self.buffer.len() < 2 {
            return Ok(false);
        }

        if self.buffer.starts_with(CRLF) {
            self.buffer.advance(CRLF.len());
            self.phase = Phase::Headers;
            Ok(true)
        } else if self.buffer.starts_with(b"--") {
            self.buffer.clear();
            self.phase = Phase::Finished;
            Ok(false)
        } else {
            Err(ProtocolError::MalformedBoundary {
                details: "delimiter not followed by line break".to_string(),
            })
        }
    }

    fn read_headers(&mut self) -> Result<bool, ProtocolError> {
        let (header_len, consumed) = if self.buffer.starts_with(CRLF) {
            (0, CRLF.len())
        } else if let Some(pos) = find(&self.buffer, HEADER_END, 0) {
            (pos, pos + HEADER_END.len())
        } else if self.buffer.len() > self.limits.max_header_size {
            return Err(ProtocolError::HeaderTooLarge {
                limit: self.limits.max_header_size,
            });
        } else {
            return Ok(false);
        };

        if header_len > self.limits.max_header_size {
            return Err(ProtocolError::HeaderTooLarge {
                limit: self.limits.max_header_size,
            });
        }

        let content_length = parse_content_length(&self.buffer[..header_len])?;
        if let Some(size) = content_length {
            if size > self.limits.max_part_size {
                return Err(ProtocolError::PartTooLarge {
                    size,
                    limit: self.limits.max_part_size,
                });
            }
        }

        self.buffer.advance(consumed);
        self.scanned = 0;
        self.phase = Phase::Body { content_length };
        Ok(true)
    }

    /// Returns the payload length once the part is complete
    fn read_body(&mut self, content_length: Option<usize>) -> Result<Option<usize>, ProtocolError> {
        match content_length {
            Some(length) => {
                if self.buffer.len() < length {
                    return Ok(None);
                }
                self.buffer.advance(length);
                self.phase = Phase::Delimiter;
                Ok(Some(length))
            }
            None => match find(&self.buffer, &self.delimiter, self.scanned) {
                Some(pos) => {
                    let length = if pos >= CRLF.len() && &self.buffer[pos - CRLF.len()..pos] == CRLF {
                        pos - CRLF.len()
                    } else {
                        pos
                    };
                    if length > self.limits.max_part_size {
                        return Err(ProtocolError::PartTooLarge {
                            size: length,
                            limit: self.limits.max_part_size,
                        });
                    }
                    self.buffer.advance(pos);
                    self.scanned = 0;
                    self.phase = Phase::Delimiter;
                    Ok(Some(length))
                }
                None => {
                    let slack = self.delimiter.len() + CRLF.len();
                    if self.buffer.len() > self.limits.max_part_size + slack {
                        return Err(ProtocolError::PartTooLarge {
                            size: self.buffer.len(),
                            limit: self.limits.max_part_size,
                        });
                    }
                    // A delimiter may straddle the next chunk
                    self.scanned = self.buffer.len().saturating_sub(self.delimiter.len() - 1);
                    Ok(None)
                }
            },
        }
    }
}

fn rfc_delimiter(boundary: &str) -> Vec<u8> {
    format!("--{}", boundary).into_bytes()
}

fn parse_content_length(block: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let text = std::str::from_utf8(block).map_err(|_| ProtocolError::MalformedHeaders {
        details: "header block is not valid UTF-8".to_string(),
    })?;

    let mut content_length = None;
    for line in text.split("\r\n").filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeaders {
                details: format!("header line without colon: {:?}", line),
            })?;

        if name.trim().eq_ignore_ascii_case("content-length") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ProtocolError::MalformedHeaders {
                    details: format!("invalid Content-Length: {:?}", value.trim()),
                })?;
            content_length = Some(parsed);
        }
    }

    Ok(content_length)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
