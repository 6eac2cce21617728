//! Tenant access control.
//!
//! Every per-organization request goes through the same sequence:
//! resolve the caller, admit them to the path's organization under an explicit
//! role set, then fetch-then-check each referenced entity against that
//! organization before any write happens.

mod evaluator;
mod guard;
mod principal;
mod role;
mod scope;

pub use evaluator::{require_role, resolve_membership};
pub use guard::{authorize, OrgContext};
pub use principal::{resolve_identity, Identity, IdentityResolver, Membership, MembershipStore};
pub use role::{OrgRole, RoleSet};
pub use scope::{
    verify_parent_project, verify_parent_task, verify_reference, verify_scope, verify_transitive_scope, OrgScoped,
    ProjectScoped, ScopeResolver,
};
