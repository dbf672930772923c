//! Response-body decompression for translator inspection. Bodies arrive fully
//! buffered per phase call, so the decoders run over in-memory readers.

use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder, ZlibDecoder};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

const GZIP: &str = "gzip";
const DEFLATE: &str = "deflate";

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("unsupported content encoding")]
	UnsupportedEncoding,
	#[error("decompression failed: {0}")]
	Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseEncoding {
	#[default]
	Identity,
	Gzip,
	Deflate,
	Unsupported,
}

impl ResponseEncoding {
	/// Interpret a `content-encoding` header value. `identity` tokens are
	/// no-ops; chained encodings are unsupported.
	pub fn parse(value: Option<&str>) -> ResponseEncoding {
		let Some(raw) = value else {
			return ResponseEncoding::Identity;
		};
		let mut found = ResponseEncoding::Identity;
		for token in raw.split(',') {
			let token = token.trim();
			if token.is_empty() || token.eq_ignore_ascii_case("identity") {
				continue;
			}
			let this = if token.eq_ignore_ascii_case(GZIP) {
				ResponseEncoding::Gzip
			} else if token.eq_ignore_ascii_case(DEFLATE) {
				ResponseEncoding::Deflate
			} else {
				return ResponseEncoding::Unsupported;
			};
			if found != ResponseEncoding::Identity {
				return ResponseEncoding::Unsupported;
			}
			found = this;
		}
		found
	}

	pub fn is_compressed(&self) -> bool {
		matches!(self, ResponseEncoding::Gzip | ResponseEncoding::Deflate)
	}
}

pub async fn decode(encoding: ResponseEncoding, data: &[u8]) -> Result<Vec<u8>, Error> {
	match encoding {
		ResponseEncoding::Identity => Ok(data.to_vec()),
		ResponseEncoding::Gzip => read_all(GzipDecoder::new(BufReader::new(data))).await,
		ResponseEncoding::Deflate => read_all(ZlibDecoder::new(BufReader::new(data))).await,
		ResponseEncoding::Unsupported => Err(Error::UnsupportedEncoding),
	}
}

/// Gzip helper for tests and for re-encoding translated error bodies.
pub async fn gzip(data: &[u8]) -> Result<Vec<u8>, Error> {
	read_all(GzipEncoder::new(BufReader::new(data))).await
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Result<Vec<u8>, Error> {
	let mut out = Vec::new();
	reader.read_to_end(&mut out).await?;
	Ok(out)
}
