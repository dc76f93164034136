pub mod token_verifier;

pub use crate::models::Role;
pub use token_verifier::{AuthContext, TokenVerifier, TokenVerifierError};
