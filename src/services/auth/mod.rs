pub mod challenge;
pub mod client;
pub mod signature;
pub mod token;

pub use challenge::{ChallengeTemplate, ChallengeVars, render};
pub use client::{AuthBackend, BackendAuthClient};
pub use signature::{validate_wallet_address, verify_signature};
pub use token::Token;
