//! External permission-check collaborator (§1: out of scope to implement, only to call).
//!
//! The façade (C7) needs to ask "can `caller` do `permission` on `path`?" before mutating a
//! realm, but this crate owns neither the ACL engine nor its storage. A deferred accessor breaks
//! the dependency cycle that would otherwise exist if the ACL subsystem itself depended on the
//! realm index to resolve identities.

use std::sync::Arc;

use crate::realm::model::Caller;

/// A permission the façade checks before a write (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Create,
    Update,
    Deprecate,
    Read,
}

/// The ACL collaborator's interface, as seen from this crate. Implemented elsewhere.
pub trait Acls: Send + Sync {
    fn has_permission(&self, path: &str, permission: Permission, caller: &Caller) -> bool;
}

/// An `Acls` that grants every permission; used in tests and until a real implementation is wired.
pub struct AllowAll;

impl Acls for AllowAll {
    fn has_permission(&self, _path: &str, _permission: Permission, _caller: &Caller) -> bool {
        true
    }
}

/// Resolved lazily so the façade can be constructed before the ACL collaborator is available
/// (e.g. during startup wiring, where the ACL engine itself may depend on this crate's types).
pub type AclsAccessor = Arc<dyn Fn() -> Arc<dyn Acls> + Send + Sync>;

pub fn always_allow() -> AclsAccessor {
    Arc::new(|| Arc::new(AllowAll) as Arc<dyn Acls>)
}
