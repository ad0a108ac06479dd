//! Request extractors: acting principal, flat bodies and bracket-notation query strings.

pub mod body;
pub mod principal;

pub use body::{QueryParams, RequestBody};
pub use principal::{trusted_header_principal, CurrentPrincipal, Principal};
