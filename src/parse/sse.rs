//! Incremental Server-Sent Events codec.
//!
//! The parser is a per-stream state machine: it accepts arbitrarily split
//! chunks, tolerates LF, CR, and CRLF line endings (including a CRLF split
//! across two chunks), and dispatches an event on every blank line.

/// One parsed SSE event. `data` holds one entry per `data:` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
	pub event: String,
	pub id: Option<String>,
	pub data: Vec<String>,
	pub retry: Option<u64>,
}

impl Event {
	pub fn new(data: impl Into<String>) -> Self {
		Event {
			data: vec![data.into()],
			..Default::default()
		}
	}

	pub fn is_empty(&self) -> bool {
		self.event.is_empty() && self.id.is_none() && self.data.is_empty() && self.retry.is_none()
	}

	/// Serialize in wire form: `event:`, `id:`, one `data:` line per entry,
	/// then the blank-line terminator. Always emits LF endings.
	pub fn write_to(&self, buf: &mut Vec<u8>) {
		if !self.event.is_empty() {
			buf.extend_from_slice(b"event: ");
			buf.extend_from_slice(self.event.as_bytes());
			buf.push(b'\n');
		}
		if let Some(id) = &self.id {
			buf.extend_from_slice(b"id: ");
			buf.extend_from_slice(id.as_bytes());
			buf.push(b'\n');
		}
		if let Some(retry) = self.retry {
			buf.extend_from_slice(b"retry: ");
			buf.extend_from_slice(retry.to_string().as_bytes());
			buf.push(b'\n');
		}
		for d in &self.data {
			buf.extend_from_slice(b"data: ");
			buf.extend_from_slice(d.as_bytes());
			buf.push(b'\n');
		}
		buf.push(b'\n');
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(64);
		self.write_to(&mut buf);
		buf
	}
}

#[derive(Debug, Default)]
pub struct Parser {
	line: Vec<u8>,
	last_was_cr: bool,
	current: Event,
}

impl Parser {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feed a chunk, returning every event completed within it.
	pub fn push(&mut self, chunk: &[u8]) -> Vec<Event> {
		let mut out = Vec::new();
		for &b in chunk {
			match b {
				b'\n' => {
					if self.last_was_cr {
						// second half of CRLF; the CR already ended the line
						self.last_was_cr = false;
					} else {
						self.end_line(&mut out);
					}
				},
				b'\r' => {
					self.end_line(&mut out);
					self.last_was_cr = true;
				},
				_ => {
					self.last_was_cr = false;
					self.line.push(b);
				},
			}
		}
		out
	}

	/// Flush at end of stream: a trailing line without a terminator still
	/// counts, and a pending event is dispatched.
	pub fn finish(&mut self) -> Option<Event> {
		let mut out = Vec::new();
		if !self.line.is_empty() {
			self.end_line(&mut out);
		}
		if !self.current.is_empty() {
			out.push(std::mem::take(&mut self.current));
		}
		out.into_iter().next()
	}

	fn end_line(&mut self, out: &mut Vec<Event>) {
		let line = std::mem::take(&mut self.line);
		if line.is_empty() {
			// blank line: dispatch if we accumulated anything
			if !self.current.is_empty() {
				out.push(std::mem::take(&mut self.current));
			}
			return;
		}
		if line[0] == b':' {
			// comment
			return;
		}
		let line = String::from_utf8_lossy(&line);
		let (field, value) = match line.split_once(':') {
			Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
			None => (line.as_ref(), ""),
		};
		match field {
			"event" => self.current.event = value.to_string(),
			"id" => self.current.id = Some(value.to_string()),
			"data" => self.current.data.push(value.to_string()),
			"retry" => {
				if let Ok(ms) = value.parse::<u64>() {
					self.current.retry = Some(ms);
				}
			},
			_ => {},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ev(event: &str, id: Option<&str>, data: &[&str]) -> Event {
		Event {
			event: event.to_string(),
			id: id.map(|s| s.to_string()),
			data: data.iter().map(|s| s.to_string()).collect(),
			retry: None,
		}
	}

	#[test]
	fn parses_lf() {
		let mut p = Parser::new();
		let got = p.push(b"event: message\nid: 1\ndata: hello\n\n");
		assert_eq!(got, vec![ev("message", Some("1"), &["hello"])]);
	}

	#[test]
	fn parses_crlf() {
		let mut p = Parser::new();
		let got = p.push(b"event: message\r\nid: 1\r\ndata: hello\r\n\r\n");
		assert_eq!(got, vec![ev("message", Some("1"), &["hello"])]);
	}

	#[test]
	fn parses_cr() {
		let mut p = Parser::new();
		let got = p.push(b"event: message\rid: 1\rdata: hello\r\r");
		assert_eq!(got, vec![ev("message", Some("1"), &["hello"])]);
	}

	#[test]
	fn parses_mixed_endings() {
		let mut p = Parser::new();
		let got = p.push(b"event: message\rid: 1\r\ndata: a\ndata: b\r\n\n");
		assert_eq!(got, vec![ev("message", Some("1"), &["a", "b"])]);
	}

	#[test]
	fn line_ending_round_trip_identical() {
		let original = ev("notify", Some("abc"), &["one", "two"]);
		for sep in ["\n", "\r", "\r\n"] {
			let wire = format!(
				"event: notify{sep}id: abc{sep}data: one{sep}data: two{sep}{sep}"
			);
			let mut p = Parser::new();
			let got = p.push(wire.as_bytes());
			assert_eq!(got, vec![original.clone()], "separator {sep:?}");
		}
		// And the writer's own output parses back to the same event.
		let mut p = Parser::new();
		assert_eq!(p.push(&original.to_bytes()), vec![original]);
	}

	#[test]
	fn crlf_split_across_chunks() {
		let mut p = Parser::new();
		assert!(p.push(b"data: hi\r").is_empty());
		// the LF here completes the CRLF and must not produce a second line
		let got = p.push(b"\n\r\n");
		assert_eq!(got, vec![ev("", None, &["hi"])]);
	}

	#[test]
	fn incremental_chunks() {
		let mut p = Parser::new();
		assert!(p.push(b"da").is_empty());
		assert!(p.push(b"ta: par").is_empty());
		let got = p.push(b"tial\n\n");
		assert_eq!(got, vec![ev("", None, &["partial"])]);
	}

	#[test]
	fn comments_and_unknown_fields_ignored() {
		let mut p = Parser::new();
		let got = p.push(b": keepalive\nfoo: bar\ndata: x\n\n");
		assert_eq!(got, vec![ev("", None, &["x"])]);
	}

	#[test]
	fn blank_lines_between_events() {
		let mut p = Parser::new();
		let got = p.push(b"\n\ndata: a\n\n\n\ndata: b\n\n");
		assert_eq!(got, vec![ev("", None, &["a"]), ev("", None, &["b"])]);
	}

	#[test]
	fn finish_flushes_unterminated_event() {
		let mut p = Parser::new();
		assert!(p.push(b"data: tail").is_empty());
		assert_eq!(p.finish(), Some(ev("", None, &["tail"])));
		assert_eq!(p.finish(), None);
	}

	#[test]
	fn field_without_colon_and_no_space() {
		let mut p = Parser::new();
		let got = p.push(b"data:nospace\nretry: 250\n\n");
		assert_eq!(
			got,
			vec![Event {
				data: vec!["nospace".to_string()],
				retry: Some(250),
				..Default::default()
			}]
		);
	}
}
