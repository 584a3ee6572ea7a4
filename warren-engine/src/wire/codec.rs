// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! Incremental codec for payload streams.
//!
//! A payload stream is a concatenation of self-delimiting JSON documents.
//! The [`Decoder`] frames documents out of arbitrarily-chunked input, so
//! both directions of the protocol can stream without buffering a whole
//! response body.

use bytes::{Buf as _, Bytes, BytesMut};
use futures::{Stream, StreamExt as _};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed document in payload stream")]
    Json(#[from] serde_json::Error),
    #[error("payload stream ended mid-document")]
    Truncated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serialize one value as a stream element.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, Error> {
    let mut out = serde_json::to_vec(value)?;
    out.push(b'\n');
    Ok(Bytes::from(out))
}

/// Frames JSON documents out of a growing byte buffer.
pub struct Decoder<T> {
    buf: BytesMut,
    _marker: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> Decoder<T> {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk)
    }

    /// Decode the next complete document, or `None` if the buffer holds
    /// only a prefix of one.
    pub fn decode_next(&mut self) -> Result<Option<T>, Error> {
        let blank = self
            .buf
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        if blank > 0 {
            self.buf.advance(blank);
        }
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut documents = serde_json::Deserializer::from_slice(&self.buf).into_iter::<T>();
        match documents.next() {
            None => Ok(None),
            Some(Ok(value)) => {
                let consumed = documents.byte_offset();
                drop(documents);
                self.buf.advance(consumed);
                Ok(Some(value))
            },
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(Error::Json(e)),
        }
    }

    /// Assert that the stream ended on a document boundary.
    pub fn finish(&self) -> Result<(), Error> {
        if self.buf.iter().all(|b| b.is_ascii_whitespace()) {
            Ok(())
        } else {
            Err(Error::Truncated)
        }
    }
}

impl<T: DeserializeOwned> Default for Decoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pulls typed documents out of a chunked body stream.
pub struct Source<B, T> {
    body: B,
    decoder: Decoder<T>,
    ended: bool,
}

impl<B, T> Source<B, T>
where
    B: Stream<Item = std::io::Result<Bytes>> + Unpin,
    T: DeserializeOwned,
{
    pub fn new(body: B) -> Self {
        Self {
            body,
            decoder: Decoder::new(),
            ended: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<T>, Error> {
        loop {
            if let Some(value) = self.decoder.decode_next()? {
                return Ok(Some(value));
            }
            if self.ended {
                self.decoder.finish()?;
                return Ok(None);
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.decoder.extend(&chunk),
                Some(Err(e)) => return Err(Error::Io(e)),
                None => self.ended = true,
            }
        }
    }
}
