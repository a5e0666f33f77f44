use bytes::Bytes;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};

/// Body collected off the wire: decoded text, streaming hash, byte count.
#[derive(Debug)]
pub(crate) struct CollectedBody {
    pub text: String,
    pub sha256_hex: String,
    pub bytes: u64,
}

#[derive(Debug)]
pub(crate) enum BodyError<E> {
    /// The cumulative byte count crossed the ceiling mid-stream.
    TooLarge { read: u64, limit: u64 },
    Transport(E),
}

/// Streams a response body chunk-by-chunk into a running SHA-256 and an
/// incremental UTF-8 decoder, aborting the instant the cumulative count
/// crosses `limit`. Never buffers raw bytes beyond one chunk plus a
/// three-byte carry, so many concurrent downloads near the ceiling stay
/// cheap.
pub(crate) async fn collect_body<S, E>(mut stream: S, limit: u64) -> Result<CollectedBody, BodyError<E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    let mut hasher = Sha256::new();
    let mut decoder = Utf8StreamDecoder::new();
    let mut read: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Transport)?;
        read = read.saturating_add(chunk.len() as u64);
        if read > limit {
            return Err(BodyError::TooLarge { read, limit });
        }
        hasher.update(&chunk);
        decoder.push(&chunk);
    }

    Ok(CollectedBody {
        text: decoder.finish(),
        sha256_hex: format!("{:x}", hasher.finalize()),
        bytes: read,
    })
}

/// Incremental UTF-8 decoder that buffers multi-byte sequences split across
/// chunk boundaries. Invalid sequences decode to U+FFFD, matching the lossy
/// conversion a whole-buffer decode would produce.
pub(crate) struct Utf8StreamDecoder {
    out: String,
    // At most 3 bytes: the longest incomplete UTF-8 sequence tail.
    carry: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub(crate) fn new() -> Self {
        Self {
            out: String::new(),
            carry: Vec::with_capacity(4),
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        if self.carry.is_empty() {
            self.decode(chunk, false);
        } else {
            // Carry is tiny, so the copy is bounded regardless of chunk size.
            let mut joined = std::mem::take(&mut self.carry);
            joined.extend_from_slice(chunk);
            self.decode(&joined, false);
        }
    }

    pub(crate) fn finish(mut self) -> String {
        if !self.carry.is_empty() {
            let carry = std::mem::take(&mut self.carry);
            self.decode(&carry, true);
        }
        self.out
    }

    fn decode(&mut self, mut input: &[u8], at_end: bool) {
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    self.out.push_str(valid);
                    return;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    // Safe: from_utf8 vouched for this prefix.
                    self.out
                        .push_str(std::str::from_utf8(&input[..valid_up_to]).unwrap_or_default());
                    match err.error_len() {
                        Some(invalid) => {
                            self.out.push(char::REPLACEMENT_CHARACTER);
                            input = &input[valid_up_to + invalid..];
                        }
                        None => {
                            // Incomplete trailing sequence: hold it for the
                            // next chunk, or flush as replacement at EOF.
                            if at_end {
                                self.out.push(char::REPLACEMENT_CHARACTER);
                            } else {
                                self.carry.extend_from_slice(&input[valid_up_to..]);
                            }
                            return;
                        }
                    }
                }
            }
        }
    }
}
