//! Assertion validators.

pub mod audience;
pub mod signature;
pub mod temporal;

pub use audience::validate_audience;
pub use signature::{
    check_signature_profile, ProfileTarget, SignatureValidator, SignatureVerifier, SignedElement,
};
pub use temporal::validate_validity_period;
