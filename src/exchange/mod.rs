//! Provider token exchanges.
//!
//! Each exchange is a narrow async trait with one HTTP implementation.
//! Rotators take them as `Arc<dyn ...>` so tests can substitute recording
//! fakes without touching the network.

pub mod aws;
pub mod gcp;

pub use aws::{AssumeRoleRequest, AwsSessionCredentials, HttpStsClient, WebIdentityExchange};
pub use gcp::{
    HttpServiceAccountImpersonation, HttpStsExchange, ServiceAccountImpersonation, StsExchange,
};
