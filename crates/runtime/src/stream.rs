//! Engine stdout decoding
//!
//! The engine writes JSON objects back to back (normally one per line, but
//! nothing relies on that). [`LogStreamDecoder`] turns arbitrary chunks of that
//! byte stream into [`StreamItem`]s. [`LogStream`] drives a decoder from an
//! `AsyncRead` and forwards items over a channel.
//!
//! Bytes that are not JSON never end the stream. They are surfaced once as
//! [`StreamItem::Malformed`] and decoding resumes at the next line.

use serde_json::Value;
use sidecar_protocol::LogRecord;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

const READ_CHUNK: usize = 8 * 1024;

/// Undecodable bytes held back waiting for a newline are flushed as
/// [`StreamItem::Malformed`] once they grow past this.
pub const MAX_UNTERMINATED: usize = 64 * 1024;

/// One unit decoded from the engine's output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
	/// A complete JSON object.
	Record(LogRecord),
	/// Bytes that could not be decoded as a log record, verbatim.
	Malformed(Vec<u8>),
}

/// Incremental decoder for concatenated JSON objects.
#[derive(Debug, Default)]
pub struct LogStreamDecoder {
	buf: Vec<u8>,
}

impl LogStreamDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Bytes held back waiting for the rest of a value.
	pub fn pending(&self) -> &[u8] {
		&self.buf
	}

	/// Appends `chunk` and returns every item it completes, in stream order.
	pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
		self.buf.extend_from_slice(chunk);
		let mut items = Vec::new();
		let consumed = decode_into(&self.buf, &mut items, false);
		self.buf.drain(..consumed);
		items
	}

	/// Flushes whatever is left once the stream has ended.
	///
	/// A trailing value without a delimiter is still decoded; anything else
	/// that is not whitespace comes back as [`StreamItem::Malformed`].
	pub fn finish(&mut self) -> Vec<StreamItem> {
		let mut items = Vec::new();
		let consumed = decode_into(&self.buf, &mut items, true);
		self.buf.drain(..consumed);
		if self.buf.iter().any(|b| !b.is_ascii_whitespace()) {
			items.push(StreamItem::Malformed(std::mem::take(&mut self.buf)));
		}
		self.buf.clear();
		items
	}
}

/// Decodes as many values from `buf` as possible and returns the number of
/// bytes consumed. Malformed bytes with no newline after them stay in `buf`
/// until they exceed [`MAX_UNTERMINATED`].
/// Unless `at_eof`, a number running to the end of `buf` stays too, since more
/// digits may follow.
fn decode_into(buf: &[u8], items: &mut Vec<StreamItem>, at_eof: bool) -> usize {
	let mut offset = 0;

	loop {
		let rest = &buf[offset..];
		let start = rest
			.iter()
			.position(|b| !b.is_ascii_whitespace())
			.unwrap_or(rest.len());
		if start == rest.len() {
			return offset + start;
		}

		let mut values = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();
		match values.next() {
			Some(Ok(value)) => {
				let end = values.byte_offset();
				// A bare number at the end of a chunk may still be growing.
				if !at_eof && end == rest.len() && value.is_number() {
					return offset;
				}
				items.push(match LogRecord::try_from(value) {
					Ok(record) => StreamItem::Record(record),
					Err(_) => StreamItem::Malformed(rest[start..end].to_vec()),
				});
				offset += end;
			}
			Some(Err(e)) if e.is_eof() => return offset,
			Some(Err(_)) => match rest[start..].iter().position(|b| *b == b'\n') {
				Some(pos) => {
					let newline = start + pos;
					items.push(StreamItem::Malformed(rest[start..=newline].to_vec()));
					offset += newline + 1;
				}
				None if rest.len() - start > MAX_UNTERMINATED => {
					items.push(StreamItem::Malformed(rest[start..].to_vec()));
					return offset + rest.len();
				}
				None => return offset,
			},
			None => return offset + rest.len(),
		}
	}
}

/// Reads engine output and emits decoded items over a channel.
pub struct LogStream<R> {
	reader: R,
	decoder: LogStreamDecoder,
	tx: mpsc::UnboundedSender<StreamItem>,
}

impl<R> LogStream<R>
where
	R: AsyncRead + Unpin,
{
	/// Creates a stream over `reader` and the receiver its items arrive on.
	pub fn new(reader: R) -> (Self, mpsc::UnboundedReceiver<StreamItem>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(
			Self {
				reader,
				decoder: LogStreamDecoder::new(),
				tx,
			},
			rx,
		)
	}

	/// Runs until EOF or until the receiver is dropped.
	///
	/// # Errors
	///
	/// Returns `Error::Transport` if reading fails. Items decoded before the
	/// failure have already been sent.
	pub async fn run(mut self) -> Result<()> {
		let mut chunk = vec![0u8; READ_CHUNK];
		loop {
			let n = self
				.reader
				.read(&mut chunk)
				.await
				.map_err(|e| Error::Transport(format!("Failed to read engine output: {e}")))?;
			let items = if n == 0 {
				self.decoder.finish()
			} else {
				self.decoder.feed(&chunk[..n])
			};
			for item in items {
				if self.tx.send(item).is_err() {
					return Ok(());
				}
			}
			if n == 0 {
				return Ok(());
			}
		}
	}
}
