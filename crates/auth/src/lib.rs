//! `lotledger-auth`: operator authorization boundary.
//!
//! Authentication and tenant provisioning happen elsewhere; this crate only
//! answers "may this operator, acting in this tenant, perform this operation".
//! It is decoupled from transport and storage.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, Principal, authorize};
pub use permissions::Permission;
pub use principal::TenantMembership;
pub use roles::Role;
