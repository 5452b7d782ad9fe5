//! Token codec: authenticated symmetric encryption of short opaque
//! identifiers (request ids, operator ids) into URL-safe strings,
//! used to build the tokenized links embedded in operator/user mail.

use thiserror::Error;

mod codec;

pub use codec::TokenCodec;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("token decode failed: {0}")]
    DecodeFailure(String),
}
