//! Identity and transport crypto shared by the Actions agent facades.
//!
//! * [rsa_params] holds the agent key in the vendor `RSAParameters` layout.
//! * [jwt] signs client assertions and application tokens with RS256.
//! * [oauth] exchanges a client assertion for an access token.
//! * [session] unwraps the session key and decrypts message bodies.
pub mod error;
pub mod jwt;
pub mod oauth;
pub mod rsa_params;
pub mod serde_base64;
pub mod session;

pub use error::CryptoError;
pub use rsa_params::RsaParameters;
