//! Access token claims, the HS256 codec and the issuer for token pairs.

pub mod claims;
pub mod clock;
pub mod codec;
pub mod error;
pub mod issuer;

pub use claims::ClaimSet;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::TokenCodec;
pub use error::{DecodeError, TokenError};
pub use issuer::{AccessSubject, RotationPolicy, TokenConfig, TokenIssuer, TokenPair};
