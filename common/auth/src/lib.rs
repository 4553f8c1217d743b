pub mod claims;
pub mod codec;
pub mod config;
pub mod error;

pub use claims::{AccessClaims, RefreshClaims, REFRESH_TOKEN_TYPE};
pub use codec::TokenCodec;
pub use config::TokenConfig;
pub use error::{TokenError, TokenResult};
