use super::principal::Principal;
use super::tree::Lineage;
use super::{permissions, Action, Resource, RoleKind};

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allow => None,
            Decision::Deny(reason) => Some(*reason),
        }
    }
}

/// Why a check failed. Logged, never sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoMatchingRule,
    MissingPermission,
    NotEnumerable,
    NotInChain,
    NotSelf,
    NotBudgetOwner,
    KindMismatch,
    TargetRequired,
    TargetNotFound,
    StoreUnavailable,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::NoMatchingRule => "no_matching_rule",
            DenyReason::MissingPermission => "missing_permission",
            DenyReason::NotEnumerable => "not_enumerable",
            DenyReason::NotInChain => "not_in_chain",
            DenyReason::NotSelf => "not_self",
            DenyReason::NotBudgetOwner => "not_budget_owner",
            DenyReason::KindMismatch => "kind_mismatch",
            DenyReason::TargetRequired => "target_required",
            DenyReason::TargetNotFound => "target_not_found",
            DenyReason::StoreUnavailable => "store_unavailable",
        }
    }
}

fn require(principal: &Principal, codename: &str) -> Decision {
    if principal.has_permission(codename) {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::MissingPermission)
    }
}

/// Authority over `lineage.target`: an ancestor within the resource's depth,
/// or the target itself when `allow_self` is set.
fn within_chain(principal: &Principal, resource: Resource, lineage: &Lineage, allow_self: bool) -> Decision {
    if lineage.target.role != resource.role_kind() {
        return Decision::Deny(DenyReason::KindMismatch);
    }
    if allow_self && lineage.is_self(principal.user_id) {
        return Decision::Allow;
    }
    if lineage.has_ancestor_within(principal.user_id, resource.ancestry_depth()) {
        return Decision::Allow;
    }
    Decision::Deny(DenyReason::NotInChain)
}

fn permission_then_chain(
    principal: &Principal,
    codename: &str,
    resource: Resource,
    target: Option<&Lineage>,
    allow_self: bool,
) -> Decision {
    if principal.is_superuser() {
        return Decision::Allow;
    }
    match require(principal, codename) {
        Decision::Allow => match target {
            Some(lineage) => within_chain(principal, resource, lineage, allow_self),
            None => Decision::Allow,
        },
        deny => deny,
    }
}

/// Read access. Without a target this is the collection-level `view_` check.
pub fn can_view(principal: &Principal, resource: Resource, target: Option<&Lineage>) -> Decision {
    permission_then_chain(principal, &permissions::view(resource), resource, target, true)
}

/// Invite access. With a target this is the re-invite of an existing descendant.
pub fn can_create(principal: &Principal, resource: Resource, target: Option<&Lineage>) -> Decision {
    permission_then_chain(principal, &permissions::add(resource), resource, target, false)
}

pub fn can_change(principal: &Principal, resource: Resource, target: Option<&Lineage>) -> Decision {
    permission_then_chain(principal, &permissions::change(resource), resource, target, true)
}

/// Nobody deletes themselves; only ancestors (or a superuser) may.
pub fn can_delete(principal: &Principal, resource: Resource, target: Option<&Lineage>) -> Decision {
    permission_then_chain(principal, &permissions::delete(resource), resource, target, false)
}

/// Phase 1: may the principal attempt `action` on `resource` at all.
pub fn collection_permission(principal: &Principal, action: Action, resource: Resource) -> Decision {
    if principal.is_superuser() {
        return Decision::Allow;
    }

    let decision = match action {
        // Candidates are reachable one by one, never enumerable.
        Action::List if resource == Resource::Candidate => Decision::Deny(DenyReason::NotEnumerable),
        a if a.is_safe() => can_view(principal, resource, None),
        Action::Create | Action::InviteAgain => can_create(principal, resource, None),
        Action::Update | Action::PartialUpdate => can_change(principal, resource, None),
        Action::Destroy => can_delete(principal, resource, None),
        Action::SetFirebaseToken if resource == Resource::Budget => {
            if principal.role == RoleKind::BudgetOwner {
                Decision::Allow
            } else {
                Decision::Deny(DenyReason::NotBudgetOwner)
            }
        }
        _ => Decision::Deny(DenyReason::NoMatchingRule),
    };

    if let Decision::Deny(reason) = decision {
        tracing::debug!(
            user_id = %principal.user_id,
            action = action.as_str(),
            resource = resource.model(),
            reason = reason.as_str(),
            "collection permission denied"
        );
    }
    decision
}

/// Phase 2: does the principal's place in the target's chain authorize `action`.
pub fn object_permission(principal: &Principal, action: Action, resource: Resource, target: &Lineage) -> Decision {
    if principal.is_superuser() {
        tracing::debug!(
            user_id = %principal.user_id,
            action = action.as_str(),
            "superuser bypass"
        );
        return Decision::Allow;
    }

    let decision = match action {
        Action::SetFirebaseToken => {
            if target.is_self(principal.user_id) {
                Decision::Allow
            } else {
                Decision::Deny(DenyReason::NotSelf)
            }
        }
        Action::List | Action::Create => Decision::Deny(DenyReason::NoMatchingRule),
        a if a.is_safe() => can_view(principal, resource, Some(target)),
        Action::Update | Action::PartialUpdate => can_change(principal, resource, Some(target)),
        Action::Destroy => can_delete(principal, resource, Some(target)),
        Action::InviteAgain => can_create(principal, resource, Some(target)),
        _ => Decision::Deny(DenyReason::NoMatchingRule),
    };

    if let Decision::Deny(reason) = decision {
        tracing::debug!(
            user_id = %principal.user_id,
            target_id = %target.target.id,
            action = action.as_str(),
            resource = resource.model(),
            reason = reason.as_str(),
            "object permission denied"
        );
    }
    decision
}
