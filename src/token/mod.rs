//! Client-side access token handling.
//!
//! Tokens are compact `header.payload.signature` strings. Only the payload is
//! interpreted here: signatures are checked by the API, never by this crate.

pub mod claims;
pub mod mint;
pub mod store;
pub mod validator;

pub use claims::Claims;
pub use mint::{MintClaims, mint_token};
pub use store::TokenStore;
pub use validator::TokenValidator;
