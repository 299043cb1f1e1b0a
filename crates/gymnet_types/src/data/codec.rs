//! Envelope codec.
//!
//! Serializes [`Request`] and [`Reply`] envelopes through serde into one of two binary
//! formats:
//! - `Pickle`: self-describing, readable natively by a Python agent (`pickle.loads`).
//! - `Bincode`: compact positional encoding (standard config) for Rust-to-Rust links.
//!
//! Envelopes are validated before encoding and after decoding, so a decoded value never
//! carries duplicate dict keys. Both directions refuse values nested deeper than
//! [`CodecConfig::max_depth`].

use bincode::config;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::envelope::{Reply, Request};
use super::pickle_nesting::{check_nesting, NestingError};
use super::value::{with_depth_limit, Value, ValueError};

pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Pickle container levels per value level: variant dict, item list, entry dict.
const PICKLE_LEVELS_PER_VALUE: usize = 3;
/// Request and step dicts around the outermost value.
const PICKLE_ENVELOPE_LEVELS: usize = 2;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization failed: {0}")]
    SerializationError(String),
    #[error("Deserialization failed: {0}")]
    DeserializationError(String),
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),
    #[error("Value nesting exceeds {max_depth} levels")]
    TooDeep { max_depth: usize },
    #[error(transparent)]
    InvalidValue(#[from] ValueError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Pickle,
    Bincode,
}

/// Codec configuration for encoding/decoding envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    pub wire_format: WireFormat,
    /// Deepest value accepted in either direction; a box or an empty dict is one level.
    pub max_depth: usize,
}

impl CodecConfig {
    pub fn new(wire_format: WireFormat) -> Self {
        Self {
            wire_format,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self::new(WireFormat::default())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec {
    config: CodecConfig,
}

impl EnvelopeCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn wire_format(&self) -> WireFormat {
        self.config.wire_format
    }

    pub fn max_depth(&self) -> usize {
        self.config.max_depth
    }

    pub fn encode_request(&self, request: &Request) -> Result<Vec<u8>, CodecError> {
        request.validate()?;
        self.check_depth(request.observation())?;
        self.check_depth(request.reward())?;
        self.encode(request)
    }

    pub fn decode_request(&self, bytes: &[u8]) -> Result<Request, CodecError> {
        let request: Request = self.decode(bytes)?;
        request.validate()?;
        Ok(request)
    }

    pub fn encode_reply(&self, reply: &Reply) -> Result<Vec<u8>, CodecError> {
        reply.validate()?;
        self.check_depth(&reply.action)?;
        self.encode(reply)
    }

    pub fn decode_reply(&self, bytes: &[u8]) -> Result<Reply, CodecError> {
        let reply: Reply = self.decode(bytes)?;
        reply.validate()?;
        Ok(reply)
    }

    fn too_deep(&self) -> CodecError {
        CodecError::TooDeep {
            max_depth: self.config.max_depth,
        }
    }

    fn check_depth(&self, value: &Value) -> Result<(), CodecError> {
        if value.depth() > self.config.max_depth {
            return Err(self.too_deep());
        }
        Ok(())
    }

    fn encode<T: Serialize>(&self, envelope: &T) -> Result<Vec<u8>, CodecError> {
        match self.config.wire_format {
            WireFormat::Pickle => serde_pickle::to_vec(envelope, serde_pickle::SerOptions::new())
                .map_err(|e| CodecError::SerializationError(e.to_string())),
            WireFormat::Bincode => bincode::serde::encode_to_vec(envelope, config::standard())
                .map_err(|e| CodecError::SerializationError(e.to_string())),
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let (decoded, limit_hit) =
            with_depth_limit(self.config.max_depth, || self.decode_with(bytes));
        if limit_hit {
            return Err(self.too_deep());
        }
        decoded
    }

    fn decode_with<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self.config.wire_format {
            WireFormat::Pickle => {
                let pickle_limit = self
                    .config
                    .max_depth
                    .saturating_mul(PICKLE_LEVELS_PER_VALUE)
                    .saturating_add(PICKLE_ENVELOPE_LEVELS);
                check_nesting(bytes, pickle_limit).map_err(|e| match e {
                    NestingError::TooDeep => self.too_deep(),
                    other => CodecError::DeserializationError(other.to_string()),
                })?;
                serde_pickle::from_slice(bytes, serde_pickle::DeOptions::new())
                    .map_err(|e| CodecError::DeserializationError(e.to_string()))
            }
            WireFormat::Bincode => {
                let (envelope, read): (T, usize) =
                    bincode::serde::decode_from_slice(bytes, config::standard())
                        .map_err(|e| CodecError::DeserializationError(e.to_string()))?;
                if read != bytes.len() {
                    return Err(CodecError::TrailingBytes(bytes.len() - read));
                }
                Ok(envelope)
            }
        }
    }
}
