//! SAML2 SSO assertion validation and just-in-time provisioning.
//!
//! The [`pipeline`] turns an encoded SAML payload into a
//! [`ValidationOutcome`] after checking status, validity period, audience
//! and signatures. The [`authenticator`] adds observer hooks, user
//! provisioning and the login permission check on top.
//!
//! XML canonicalization, signature cryptography and assertion decryption
//! are supplied by the caller through [`SignatureValidator`] and
//! [`AssertionDecrypter`].

pub mod authenticator;
pub mod claims;
pub mod clock;
pub mod config;
pub mod decode;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provisioning;
pub mod sp_identifier;
pub mod tenant;
pub mod trust;
pub mod validation;

pub use authenticator::{AuthenticationObserver, SsoAuthenticator, UserRealm, UserStore};
pub use claims::AssertionDecrypter;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ProvisioningConfig, SsoConfig, SsoConfigJson, ValidationConfig};
pub use decode::{AssertionDecoder, XmlAssertionDecoder};
pub use error::{ErrorKind, LoginError, ValidationError, ValidationResult};
pub use pipeline::{validate, ScreenedAssertion, ValidationOutcome, ValidationPipeline};
pub use provisioning::{plan_provisioning, PlanKind, ProvisioningPlan};
pub use sp_identifier::{ServiceProviderIdCell, SERVICE_PROVIDER_ID};
pub use trust::{CertificateTrustStore, Credential, TrustAnchor, TrustAnchorResolver};
pub use validation::{SignatureValidator, SignedElement};
