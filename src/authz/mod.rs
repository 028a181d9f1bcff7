//! Authorization module - role tree, predicate engine and gatekeeper
//!
//! Authority flows strictly downward along the reporting chain:
//! Candidate <- Coordinator <- Brigadier <- BudgetOwner.
//! A request is checked in two phases:
//! - collection level: may the actor attempt this action on this kind of resource at all
//! - object level: does the actor's position in the target's chain authorize it
//!
//! Superusers bypass both phases. Everything else fails closed.

mod evaluator;
mod gatekeeper;
mod principal;
mod tree;

pub use evaluator::{
    can_create, can_change, can_delete, can_view, collection_permission, object_permission, Decision,
    DenyReason,
};
pub use gatekeeper::Gatekeeper;
pub use principal::{load_principal, Principal};
pub use tree::{Lineage, RoleTree, SqliteRoleTree, TreeNode};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Longest ancestor chain that can matter: BudgetOwner -> Brigadier -> Coordinator -> Candidate.
pub const MAX_ANCESTRY_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Candidate,
    Coordinator,
    Brigadier,
    #[serde(rename = "budget")]
    BudgetOwner,
    #[serde(rename = "superuser")]
    SuperUser,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Candidate => "candidate",
            RoleKind::Coordinator => "coordinator",
            RoleKind::Brigadier => "brigadier",
            RoleKind::BudgetOwner => "budget",
            RoleKind::SuperUser => "superuser",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "candidate" => Some(RoleKind::Candidate),
            "coordinator" => Some(RoleKind::Coordinator),
            "brigadier" => Some(RoleKind::Brigadier),
            "budget" => Some(RoleKind::BudgetOwner),
            "superuser" => Some(RoleKind::SuperUser),
            _ => None,
        }
    }

    /// Depth from the top of the hierarchy. Superusers live outside the tree.
    pub fn depth(&self) -> Option<usize> {
        match self {
            RoleKind::Candidate => Some(0),
            RoleKind::Coordinator => Some(1),
            RoleKind::Brigadier => Some(2),
            RoleKind::BudgetOwner => Some(3),
            RoleKind::SuperUser => None,
        }
    }

    /// Role-kind an actor of this kind reports to, if any.
    pub fn parent_kind(&self) -> Option<RoleKind> {
        match self {
            RoleKind::Candidate | RoleKind::SuperUser => None,
            RoleKind::Coordinator => Some(RoleKind::Candidate),
            RoleKind::Brigadier => Some(RoleKind::Coordinator),
            RoleKind::BudgetOwner => Some(RoleKind::Brigadier),
        }
    }
}

/// Role collections exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Budget,
    Brigadier,
    Coordinator,
    Candidate,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::Budget,
        Resource::Brigadier,
        Resource::Coordinator,
        Resource::Candidate,
    ];

    /// Model name used in permission codenames.
    pub fn model(&self) -> &'static str {
        match self {
            Resource::Budget => "budget",
            Resource::Brigadier => "brigadier",
            Resource::Coordinator => "coordinator",
            Resource::Candidate => "candidate",
        }
    }

    /// URL segment of the collection.
    pub fn collection(&self) -> &'static str {
        match self {
            Resource::Budget => "budgets",
            Resource::Brigadier => "brigadiers",
            Resource::Coordinator => "coordinators",
            Resource::Candidate => "candidates",
        }
    }

    pub fn role_kind(&self) -> RoleKind {
        match self {
            Resource::Budget => RoleKind::BudgetOwner,
            Resource::Brigadier => RoleKind::Brigadier,
            Resource::Coordinator => RoleKind::Coordinator,
            Resource::Candidate => RoleKind::Candidate,
        }
    }

    /// How many levels of the target's ancestor chain may hold authority over it.
    /// Equal to the target's depth from the top, so only strict ancestors qualify.
    pub fn ancestry_depth(&self) -> usize {
        self.role_kind().depth().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    List,
    Retrieve,
    Create,
    InviteAgain,
    Update,
    PartialUpdate,
    Destroy,
    SetFirebaseToken,
    Notifications,
    NewNotifications,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::List => "list",
            Action::Retrieve => "retrieve",
            Action::Create => "create",
            Action::InviteAgain => "invite_again",
            Action::Update => "update",
            Action::PartialUpdate => "partial_update",
            Action::Destroy => "destroy",
            Action::SetFirebaseToken => "set_firebase_token",
            Action::Notifications => "notifications",
            Action::NewNotifications => "new_notifications",
        }
    }

    /// Read-only actions, the equivalent of GET/HEAD/OPTIONS.
    pub fn is_safe(&self) -> bool {
        matches!(
            self,
            Action::List | Action::Retrieve | Action::Notifications | Action::NewNotifications
        )
    }

    /// Actions that never carry a concrete target.
    pub fn is_collection(&self) -> bool {
        matches!(self, Action::List | Action::Create)
    }
}

/// Permission codenames, `<app>.<verb>_<model>`.
pub mod permissions {
    use super::Resource;

    pub const USER_APP: &str = "user";
    pub const CORE_APP: &str = "core";

    pub fn view(resource: Resource) -> String {
        format!("{USER_APP}.view_{}", resource.model())
    }

    pub fn add(resource: Resource) -> String {
        format!("{USER_APP}.add_{}", resource.model())
    }

    pub fn change(resource: Resource) -> String {
        format!("{USER_APP}.change_{}", resource.model())
    }

    /// Deleting brigadiers and budgets is governed by the `core` app's permissions.
    pub fn delete(resource: Resource) -> String {
        let app = match resource {
            Resource::Brigadier | Resource::Budget => CORE_APP,
            Resource::Coordinator | Resource::Candidate => USER_APP,
        };
        format!("{app}.delete_{}", resource.model())
    }
}
