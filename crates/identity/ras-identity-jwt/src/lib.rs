//! Signed bearer tokens and the JWT authentication provider.

pub mod codec;
mod provider;

pub use codec::{
    Token, TokenCodec, TokenConfig, TokenError, TokenResult, REGISTERED_CLAIMS, USER_ID_CLAIM,
};
pub use provider::JwtAuthProvider;
