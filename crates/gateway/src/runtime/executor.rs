//! The Plan Executor (C4): a deterministic DFS walk of a plan's steps.
//!
//! The executor never queries the LLM and never retries — it runs a step
//! exactly once and stops the whole plan at the first error. All retry,
//! reasoning-based repair, and dangerous-command filtering live one layer
//! up, in the background runner (C5), which calls [`execute_step`] once
//! per attempt.

use ap_domain::plan::{flatten_steps, PlanRun, PlanStatus, StepKind, StepStatus};
use ap_tools::invoker::{classify_step_result, is_command_call, InvokeResult, StepOutcome};
use async_trait::async_trait;

/// Abstraction over "make the HTTP call this step names", so the executor
/// can be exercised with a fake invoker in tests without a live tool
/// server, and so the background runner can inject retry/reasoner logic
/// around each real call.
#[async_trait]
pub trait StepInvoker: Send + Sync {
    async fn invoke_step(&self, step_path: &str, step: &ap_domain::plan::PlanStep) -> InvokeResult;
}

/// Outcome of walking the plan to completion or to the first error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Done,
    Error { step_path: String, reason: String },
}

/// Run every pending step of `plan` in DFS order until one fails or all
/// complete. Mutates `plan` in place (per-step status/result fields,
/// `plan.current_step_path`, `plan.status`).
///
/// Steps already `done` or `skipped` are not re-executed — this makes the
/// walk resumable after a process restart lands a run back in `running`
/// with some steps already marked done (not currently exercised by
/// Recovery, which always terminates interrupted runs, but kept as the
/// executor's own resumability contract independent of that policy).
pub async fn run_plan(plan: &mut PlanRun, invoker: &dyn StepInvoker) -> ExecutionOutcome {
    plan.status = PlanStatus::Running;

    let paths: Vec<String> = {
        let mut flat = Vec::new();
        flatten_steps(&plan.steps, "", &mut flat);
        flat.into_iter().map(|(path, _)| path).collect()
    };

    for path in paths {
        let step = match plan.step_at_mut(&path) {
            Some(s) => s,
            None => continue,
        };

        if matches!(step.status, StepStatus::Done | StepStatus::Skipped) {
            continue;
        }

        if let Err(msg) = step.validate_shape() {
            step.status = StepStatus::Error;
            step.error = Some(msg.clone());
            plan.status = PlanStatus::Error;
            plan.current_step_path = Some(path.clone());
            return ExecutionOutcome::Error { step_path: path, reason: msg };
        }

        plan.current_step_path = Some(path.clone());
        let step = plan.step_at_mut(&path).expect("path just validated above");
        step.status = StepStatus::Running;
        step.started_ts = Some(now_ms());

        match step.kind {
            StepKind::Note => {
                let step = plan.step_at_mut(&path).expect("path still valid");
                step.status = StepStatus::Done;
                step.ended_ts = Some(now_ms());
                step.result_summary = Some(step.title.clone());
            }
            StepKind::Subplan => {
                // Container nodes carry no execution of their own; their
                // children were already enumerated by flatten_steps.
                let step = plan.step_at_mut(&path).expect("path still valid");
                step.status = StepStatus::Done;
                step.ended_ts = Some(now_ms());
            }
            StepKind::McpCall => {
                let result = {
                    let step = plan.step_at_mut(&path).expect("path still valid");
                    invoker.invoke_step(&path, step).await
                };
                let step = plan.step_at_mut(&path).expect("path still valid");
                let call = step.tool_call.as_ref().expect("validate_shape checked this");
                let method = call.method.expect("validate_shape checked this");
                let call_path = call.path.clone().unwrap_or_default();

                let outcome = classify_step_result(is_command_call(method, &call_path), result.status_code, &result.payload);

                step.result_raw = Some(result.payload.clone());
                step.ended_ts = Some(now_ms());

                match outcome {
                    StepOutcome::Ok => {
                        step.status = StepStatus::Done;
                        step.result_summary = Some("ok".into());
                    }
                    StepOutcome::HttpError { reason } | StepOutcome::CommandFailed { reason } => {
                        step.status = StepStatus::Error;
                        step.error = Some(reason.clone());
                        plan.status = PlanStatus::Error;
                        return ExecutionOutcome::Error { step_path: path, reason };
                    }
                }
            }
        }
    }

    plan.status = PlanStatus::Done;
    plan.ended_ts = Some(now_ms());
    plan.current_step_path = None;
    ExecutionOutcome::Done
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_domain::plan::{HttpMethod, PlanStep, ToolCallSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeInvoker {
        responses: Vec<InvokeResult>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StepInvoker for FakeInvoker {
        async fn invoke_step(&self, _step_path: &str, _step: &ap_domain::plan::PlanStep) -> InvokeResult {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses[i].clone()
        }
    }

    fn mcp_step(id: &str) -> PlanStep {
        PlanStep::mcp_call(
            id,
            "run a command",
            ToolCallSpec {
                tool_id: "sys".into(),
                method: Some(HttpMethod::Post),
                path: Some("/command".into()),
                query: None,
                body: Some(json!({"cmd": "ls"})),
            },
        )
    }

    #[tokio::test]
    async fn all_notes_complete_without_invoker_calls() {
        let mut plan = PlanRun::new("p1", "goal", vec![PlanStep::note("1", "first")], 1000);
        let invoker = FakeInvoker { responses: vec![], calls: AtomicUsize::new(0) };
        let outcome = run_plan(&mut plan, &invoker).await;
        assert_eq!(outcome, ExecutionOutcome::Done);
        assert_eq!(plan.status, PlanStatus::Done);
        assert_eq!(plan.steps[0].status, StepStatus::Done);
    }

    #[tokio::test]
    async fn successful_command_step_marks_done() {
        let mut plan = PlanRun::new("p1", "goal", vec![mcp_step("1")], 1000);
        let invoker = FakeInvoker {
            responses: vec![InvokeResult {
                status_code: 200,
                payload: json!({"status": "ok", "exit_code": 0, "stdout": "", "stderr": ""}),
            }],
            calls: AtomicUsize::new(0),
        };
        let outcome = run_plan(&mut plan, &invoker).await;
        assert_eq!(outcome, ExecutionOutcome::Done);
        assert_eq!(plan.steps[0].status, StepStatus::Done);
    }

    #[tokio::test]
    async fn failing_command_step_stops_the_plan() {
        let mut plan = PlanRun::new(
            "p1",
            "goal",
            vec![mcp_step("1"), PlanStep::note("2", "never reached")],
            1000,
        );
        let invoker = FakeInvoker {
            responses: vec![InvokeResult {
                status_code: 200,
                payload: json!({"status": "error", "exit_code": 1, "stdout": "", "stderr": "boom"}),
            }],
            calls: AtomicUsize::new(0),
        };
        let outcome = run_plan(&mut plan, &invoker).await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Error { step_path: "1".into(), reason: "boom".into() }
        );
        assert_eq!(plan.status, PlanStatus::Error);
        assert_eq!(plan.steps[1].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn done_steps_are_skipped_on_resume() {
        let mut step = mcp_step("1");
        step.status = StepStatus::Done;
        step.result_summary = Some("already ran".into());
        let mut plan = PlanRun::new("p1", "goal", vec![step], 1000);
        let invoker = FakeInvoker { responses: vec![], calls: AtomicUsize::new(0) };
        let outcome = run_plan(&mut plan, &invoker).await;
        assert_eq!(outcome, ExecutionOutcome::Done);
    }

    #[tokio::test]
    async fn nested_subplan_children_execute_in_dfs_order() {
        let mut parent = PlanStep::note("1", "parent");
        parent.kind = StepKind::Subplan;
        parent.children = vec![mcp_step("1.1")];
        let mut plan = PlanRun::new("p1", "goal", vec![parent], 1000);
        let invoker = FakeInvoker {
            responses: vec![InvokeResult {
                status_code: 200,
                payload: json!({"status": "ok", "exit_code": 0, "stdout": "", "stderr": ""}),
            }],
            calls: AtomicUsize::new(0),
        };
        let outcome = run_plan(&mut plan, &invoker).await;
        assert_eq!(outcome, ExecutionOutcome::Done);
        assert_eq!(plan.steps[0].children[0].status, StepStatus::Done);
    }

    #[tokio::test]
    async fn non_command_mcp_call_uses_plain_2xx_classification() {
        let step = PlanStep::mcp_call(
            "1",
            "fetch",
            ToolCallSpec {
                tool_id: "sys".into(),
                method: Some(HttpMethod::Get),
                path: Some("/status".into()),
                query: None,
                body: None,
            },
        );
        let mut plan = PlanRun::new("p1", "goal", vec![step], 1000);
        let invoker = FakeInvoker {
            responses: vec![InvokeResult { status_code: 200, payload: json!({"ok": true}) }],
            calls: AtomicUsize::new(0),
        };
        let outcome = run_plan(&mut plan, &invoker).await;
        assert_eq!(outcome, ExecutionOutcome::Done);
    }
}
