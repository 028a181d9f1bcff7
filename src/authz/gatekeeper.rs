use uuid::Uuid;

use super::evaluator::{collection_permission, object_permission, Decision, DenyReason};
use super::principal::Principal;
use super::tree::RoleTree;
use super::{Action, Resource};
use crate::errors::{AppError, AppResult};

/// Runs the collection-level check, then the object-level check against a
/// lineage snapshot of the target. Holds no state besides the tree handle.
#[derive(Debug, Clone)]
pub struct Gatekeeper<T: RoleTree> {
    tree: T,
}

impl<T: RoleTree> Gatekeeper<T> {
    pub fn new(tree: T) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub async fn authorize(
        &self,
        principal: &Principal,
        action: Action,
        resource: Resource,
        target: Option<Uuid>,
    ) -> Decision {
        let collection = collection_permission(principal, action, resource);
        if !collection.is_allowed() {
            return collection;
        }

        if action.is_collection() || principal.is_superuser() {
            return Decision::Allow;
        }

        let Some(target_id) = target else {
            return Decision::Deny(DenyReason::TargetRequired);
        };

        match self.tree.lineage(target_id, resource.ancestry_depth()).await {
            Ok(Some(lineage)) => object_permission(principal, action, resource, &lineage),
            Ok(None) => Decision::Deny(DenyReason::TargetNotFound),
            Err(err) => {
                tracing::error!(
                    user_id = %principal.user_id,
                    target_id = %target_id,
                    error = %err,
                    "role tree unavailable, denying"
                );
                Decision::Deny(DenyReason::StoreUnavailable)
            }
        }
    }

    /// Same as `authorize`, with denial mapped to a generic forbidden error.
    pub async fn require(
        &self,
        principal: &Principal,
        action: Action,
        resource: Resource,
        target: Option<Uuid>,
    ) -> AppResult<()> {
        match self.authorize(principal, action, resource, target).await {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                tracing::info!(
                    user_id = %principal.user_id,
                    action = action.as_str(),
                    resource = resource.model(),
                    reason = reason.as_str(),
                    "request denied"
                );
                Err(AppError::forbidden("permission denied"))
            }
        }
    }
}
