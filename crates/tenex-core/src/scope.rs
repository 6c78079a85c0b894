// Ambient request-scoped project context (spec §9: "per-request scoping
// uses an ambient context value carried along the logical call chain, not
// thread-local storage keyed by OS thread").
//
// `tokio::task_local!` is the right primitive here: it follows the logical
// task across `.await` points and worker-thread migrations, unlike
// `std::thread_local!`, which would silently break under the engine's
// cooperative multi-task scheduling model (spec §5).

tokio::task_local! {
    static CURRENT_PROJECT: String;
}

/// Runs `f` with `project_id` set as the ambient current-project value for
/// the duration of the future, per the Conversation Registry's three-tier
/// resolution (spec §4.2): explicit argument, then this ambient value,
/// then a legacy last-initialised-project fallback.
pub async fn with_current_project<F, T>(project_id: impl Into<String>, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT_PROJECT.scope(project_id.into(), f).await
}

/// Reads the ambient current-project value, if this task was spawned
/// inside [`with_current_project`].
pub fn current_project() -> Option<String> {
    CURRENT_PROJECT.try_with(|p| p.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ambient_project_visible_inside_scope() {
        assert_eq!(current_project(), None);
        with_current_project("proj1", async {
            assert_eq!(current_project(), Some("proj1".to_string()));
        })
        .await;
        assert_eq!(current_project(), None);
    }
}
