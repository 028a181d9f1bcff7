use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{RoleKind, MAX_ANCESTRY_DEPTH};
use crate::db::row_parsers;
use crate::errors::AppResult;

/// One actor as seen by the role tree: identity, kind and reporting link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub id: Uuid,
    pub role: RoleKind,
    pub parent_id: Option<Uuid>,
}

/// A target together with its ancestors, nearest first, read in one consistent view.
#[derive(Debug, Clone)]
pub struct Lineage {
    pub target: TreeNode,
    pub ancestors: Vec<TreeNode>,
}

impl Lineage {
    pub fn new(target: TreeNode, ancestors: Vec<TreeNode>) -> Self {
        Self { target, ancestors }
    }

    pub fn is_self(&self, actor_id: Uuid) -> bool {
        self.target.id == actor_id
    }

    /// Whether `actor_id` sits within the first `depth` levels above the target.
    pub fn has_ancestor_within(&self, actor_id: Uuid, depth: usize) -> bool {
        self.ancestors
            .iter()
            .take(depth)
            .any(|node| node.id == actor_id)
    }
}

/// Read-only view of the reporting forest.
#[async_trait]
pub trait RoleTree: Send + Sync {
    async fn node(&self, id: Uuid) -> AppResult<Option<TreeNode>>;

    /// Target plus up to `max_depth` ancestors, nearest first.
    /// The walk ends early at a null parent or a dangling reference.
    async fn lineage(&self, id: Uuid, max_depth: usize) -> AppResult<Option<Lineage>>;

    async fn parent_of(&self, id: Uuid) -> AppResult<Option<TreeNode>> {
        Ok(self
            .lineage(id, 1)
            .await?
            .and_then(|lineage| lineage.ancestors.into_iter().next()))
    }

    async fn ancestors(&self, id: Uuid, max_depth: usize) -> AppResult<Vec<TreeNode>> {
        Ok(self
            .lineage(id, max_depth)
            .await?
            .map(|lineage| lineage.ancestors)
            .unwrap_or_default())
    }

    async fn role_kind(&self, id: Uuid) -> AppResult<Option<RoleKind>> {
        Ok(self.node(id).await?.map(|node| node.role))
    }
}

#[derive(Debug, Clone)]
pub struct SqliteRoleTree {
    pool: SqlitePool,
}

impl SqliteRoleTree {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn node_from_row(row: &sqlx::sqlite::SqliteRow) -> AppResult<TreeNode> {
    let id_s: String = row.try_get("id")?;
    let role_s: String = row.try_get("role")?;
    let parent_s: Option<String> = row.try_get("parent_id")?;

    Ok(TreeNode {
        id: row_parsers::parse_uuid(&id_s)?,
        role: row_parsers::parse_role(&role_s)?,
        parent_id: row_parsers::parse_opt_uuid(parent_s)?,
    })
}

#[async_trait]
impl RoleTree for SqliteRoleTree {
    async fn node(&self, id: Uuid) -> AppResult<Option<TreeNode>> {
        let row = sqlx::query("SELECT id, role, parent_id FROM actors WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(node_from_row).transpose()
    }

    async fn lineage(&self, id: Uuid, max_depth: usize) -> AppResult<Option<Lineage>> {
        let max_depth = max_depth.min(MAX_ANCESTRY_DEPTH) as i64;

        // Single statement, so the whole chain comes from one snapshot.
        let rows = sqlx::query(
            "WITH RECURSIVE chain(id, role, parent_id, hop) AS ( \
                SELECT id, role, parent_id, 0 FROM actors WHERE id = ? \
                UNION ALL \
                SELECT a.id, a.role, a.parent_id, chain.hop + 1 \
                FROM actors a JOIN chain ON a.id = chain.parent_id \
                WHERE chain.hop < ? \
             ) \
             SELECT id, role, parent_id, hop FROM chain ORDER BY hop",
        )
        .bind(id.to_string())
        .bind(max_depth)
        .fetch_all(&self.pool)
        .await?;

        let mut nodes = rows.iter().map(node_from_row).collect::<AppResult<Vec<_>>>()?;
        if nodes.is_empty() {
            return Ok(None);
        }

        let target = nodes.remove(0);
        Ok(Some(Lineage::new(target, nodes)))
    }
}
