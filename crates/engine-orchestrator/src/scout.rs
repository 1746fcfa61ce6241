//! Component L — Scout Dispatcher (spec §2 row L). Grounded on
//! `original_source/backend/app/api/routes/scout.py`: launching a scout run
//! creates exactly *one* root task carrying a hardcoded self-analysis
//! prompt. Recursive exploration is not eagerly built here — the assigned
//! agent itself calls the generic task-spawning tool as it works, governed
//! by the same lineage guard as any other child task (spec §4.4).

use engine_types::{RequestContext, Task};

use crate::task_service::{CreateTaskRequest, TaskService, TaskServiceError};

/// Renders the scout's self-analysis prompt with the caller's exploration
/// budget baked in, mirroring `SCOUT_PROMPT_TEMPLATE`'s `{num_tasks}` and
/// `{max_depth}` placeholders.
fn scout_prompt(num_tasks: u32, max_depth: u32) -> String {
    format!(
        "You are a scout agent exploring this codebase. Use the available \
         file-listing and code-search tools to understand its structure and \
         identify up to {num_tasks} follow-up investigations worth a dedicated \
         task each. For each one, call the task-creation tool yourself — do not \
         just describe it in your answer. Respect a maximum task-tree depth of \
         {max_depth}; do not spawn a task deeper than that budget allows."
    )
}

pub struct ScoutLaunchRequest {
    pub agent_id: String,
    pub num_tasks: u32,
    pub max_depth: u32,
}

pub struct ScoutLaunchResult {
    pub root_task_id: String,
    /// Always empty at launch time: the root task's own worker run is what
    /// spawns children, asynchronously, after this call returns.
    pub spawned_task_ids: Vec<String>,
}

/// Launch a scout run: one root task, no eager child-task tree.
pub async fn launch(
    tasks: &TaskService,
    request: ScoutLaunchRequest,
    ctx: RequestContext,
) -> Result<ScoutLaunchResult, TaskServiceError> {
    let description = scout_prompt(request.num_tasks, request.max_depth);
    let task: Task = tasks
        .create_task(
            CreateTaskRequest {
                description,
                assigned_agents: vec![request.agent_id],
                parent_task_id: None,
                spawned_by_agent: None,
                requires_human_approval: false,
                max_revisions: None,
            },
            ctx,
        )
        .await?;

    Ok(ScoutLaunchResult { root_task_id: task.id, spawned_task_ids: Vec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_budget_placeholders() {
        let prompt = scout_prompt(4, 2);
        assert!(prompt.contains("up to 4 follow-up investigations"));
        assert!(prompt.contains("maximum task-tree depth of 2"));
    }
}
