use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// Entity carrying its organization id directly.
pub trait OrgScoped {
    fn scope_org_id(&self) -> Uuid;
}

/// Entity whose organization is reached through its project.
pub trait ProjectScoped {
    fn scope_project_id(&self) -> Uuid;
}

/// Resolves the owning organization of a project, one hop up the chain.
#[async_trait]
pub trait ScopeResolver: Send + Sync {
    async fn project_org(&self, project_id: Uuid) -> AppResult<Option<Uuid>>;
}

fn not_found(label: &str) -> AppError {
    AppError::not_found(format!("{label} not found"))
}

/// Checks a fetched entity against the organization claimed in the path.
///
/// A missing entity and an entity owned by another organization produce the
/// same `NotFound`.
pub fn verify_scope<E: OrgScoped>(entity: Option<E>, claimed_org_id: Uuid, label: &str) -> AppResult<E> {
    match entity {
        Some(entity) if entity.scope_org_id() == claimed_org_id => Ok(entity),
        Some(entity) => {
            tracing::debug!(
                claimed_org_id = %claimed_org_id,
                actual_org_id = %entity.scope_org_id(),
                entity = label,
                "scope mismatch"
            );
            Err(not_found(label))
        }
        None => Err(not_found(label)),
    }
}

/// Same check for entities whose organization is transitive (task -> project -> org).
///
/// When `claimed_project_id` is given, the entity must also sit in that project.
pub async fn verify_transitive_scope<R, E>(
    resolver: &R,
    entity: Option<E>,
    claimed_org_id: Uuid,
    claimed_project_id: Option<Uuid>,
    label: &str,
) -> AppResult<E>
where
    R: ScopeResolver + ?Sized,
    E: ProjectScoped + Send,
{
    let Some(entity) = entity else {
        return Err(not_found(label));
    };

    let project_id = entity.scope_project_id();
    if claimed_project_id.is_some_and(|claimed| claimed != project_id) {
        tracing::debug!(entity = label, "project scope mismatch");
        return Err(not_found(label));
    }

    match resolver.project_org(project_id).await? {
        Some(org_id) if org_id == claimed_org_id => Ok(entity),
        _ => {
            tracing::debug!(claimed_org_id = %claimed_org_id, entity = label, "transitive scope mismatch");
            Err(not_found(label))
        }
    }
}

/// Validates a parent project supplied on create or update.
///
/// Unlike [`verify_scope`], a foreign or missing parent is a client input
/// error and reports `Validation`.
pub fn verify_parent_project<E: OrgScoped>(parent: Option<E>, org_id: Uuid) -> AppResult<E> {
    verify_reference(parent, org_id, "invalid parent project")
}

/// Validates a parent task: it must live in the child's project.
pub fn verify_parent_task<E: ProjectScoped>(parent: Option<E>, project_id: Uuid) -> AppResult<E> {
    match parent {
        Some(parent) if parent.scope_project_id() == project_id => Ok(parent),
        _ => Err(AppError::validation("invalid parent task")),
    }
}

/// Validates any non-parent reference taken from a request body.
pub fn verify_reference<E: OrgScoped>(entity: Option<E>, org_id: Uuid, message: &str) -> AppResult<E> {
    match entity {
        Some(entity) if entity.scope_org_id() == org_id => Ok(entity),
        _ => Err(AppError::validation(message)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Project {
        org_id: Uuid,
    }

    impl OrgScoped for Project {
        fn scope_org_id(&self) -> Uuid {
            self.org_id
        }
    }

    #[derive(Debug, Clone, Copy)]
    struct Task {
        project_id: Uuid,
    }

    impl ProjectScoped for Task {
        fn scope_project_id(&self) -> Uuid {
            self.project_id
        }
    }

    struct Projects(HashMap<Uuid, Uuid>);

    #[async_trait]
    impl ScopeResolver for Projects {
        async fn project_org(&self, project_id: Uuid) -> AppResult<Option<Uuid>> {
            Ok(self.0.get(&project_id).copied())
        }
    }

    #[test]
    fn direct_scope_matches_only_owning_org() {
        let (org_a, org_b) = (Uuid::new_v4(), Uuid::new_v4());
        let project = Project { org_id: org_a };

        assert!(verify_scope(Some(project), org_a, "project").is_ok());
        let err = verify_scope(Some(project), org_b, "project").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn foreign_and_missing_are_indistinguishable() {
        let (org_a, org_b) = (Uuid::new_v4(), Uuid::new_v4());
        let foreign = verify_scope(Some(Project { org_id: org_b }), org_a, "project").unwrap_err();
        let missing = verify_scope(None::<Project>, org_a, "project").unwrap_err();
        assert_eq!(foreign.to_string(), missing.to_string());
        assert_eq!(foreign.status(), missing.status());
    }

    #[tokio::test]
    async fn transitive_scope_walks_to_org() {
        let (org_a, org_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (project_a, project_b) = (Uuid::new_v4(), Uuid::new_v4());
        let resolver = Projects(HashMap::from([(project_a, org_a), (project_b, org_b)]));
        let task_in_b = Task { project_id: project_b };

        assert!(verify_transitive_scope(&resolver, Some(task_in_b), org_b, None, "task").await.is_ok());

        let err = verify_transitive_scope(&resolver, Some(task_in_b), org_a, None, "task")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn transitive_scope_checks_path_project() {
        let org = Uuid::new_v4();
        let (project_1, project_2) = (Uuid::new_v4(), Uuid::new_v4());
        let resolver = Projects(HashMap::from([(project_1, org), (project_2, org)]));
        let task = Task { project_id: project_1 };

        assert!(verify_transitive_scope(&resolver, Some(task), org, Some(project_1), "task").await.is_ok());
        let err = verify_transitive_scope(&resolver, Some(task), org, Some(project_2), "task")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn dangling_project_is_not_found() {
        let resolver = Projects(HashMap::new());
        let task = Task { project_id: Uuid::new_v4() };
        let err = verify_transitive_scope(&resolver, Some(task), Uuid::new_v4(), None, "task")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn parent_checks_report_validation() {
        let (org_a, org_b) = (Uuid::new_v4(), Uuid::new_v4());
        let err = verify_parent_project(Some(Project { org_id: org_b }), org_a).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "invalid parent project"));
        assert!(matches!(verify_parent_project(None::<Project>, org_a), Err(AppError::Validation(_))));
        assert!(verify_parent_project(Some(Project { org_id: org_a }), org_a).is_ok());

        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let err = verify_parent_task(Some(Task { project_id: p2 }), p1).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "invalid parent task"));
        assert!(verify_parent_task(Some(Task { project_id: p1 }), p1).is_ok());
    }
}
