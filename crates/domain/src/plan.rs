//! Plan and plan-run data model.
//!
//! A [`Plan`] (here represented by the ordered tree of [`PlanStep`]) is never
//! mutated by its own identity — it is always embedded inside a [`PlanRun`],
//! which additionally tracks execution status per step. Steps form a tree
//! (via `subplan` children) but never a graph: no back-references, no
//! cycles, addressed purely by dotted DFS path (see [`flatten_steps`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP method used to reach a tool-server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// A scalar query-parameter value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    String(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl ScalarValue {
    pub fn to_query_string(&self) -> String {
        match self {
            ScalarValue::String(s) => s.clone(),
            ScalarValue::Number(n) => n.to_string(),
            ScalarValue::Bool(b) => b.to_string(),
        }
    }
}

/// Parameters of an `mcp_call` step: a single tool-server invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolCallSpec {
    pub tool_id: String,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub query: Option<HashMap<String, ScalarValue>>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

/// Discriminant for [`PlanStep`]. `note` and `mcp_call` are leaves;
/// `subplan` is the only kind that may carry children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Note,
    McpCall,
    Subplan,
}

/// Per-step execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Error,
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        StepStatus::Pending
    }
}

/// A single node in the plan tree.
///
/// Invariant: a step with non-empty `children` always has
/// `kind == StepKind::Subplan`; `note` and `mcp_call` steps never have
/// children. This is enforced by [`PlanStep::validate_shape`], not by the
/// type system, to mirror the loosely-typed wire format tool servers and
/// the planner LLM actually produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    pub kind: StepKind,

    #[serde(default)]
    pub tool_call: Option<ToolCallSpec>,
    #[serde(default)]
    pub children: Vec<PlanStep>,

    // ── execution fields ────────────────────────────────────────────
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub started_ts: Option<i64>,
    #[serde(default)]
    pub ended_ts: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub result_raw: Option<serde_json::Value>,
}

impl PlanStep {
    pub fn note(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind: StepKind::Note,
            tool_call: None,
            children: Vec::new(),
            status: StepStatus::Pending,
            started_ts: None,
            ended_ts: None,
            error: None,
            result_summary: None,
            result_raw: None,
        }
    }

    pub fn mcp_call(id: impl Into<String>, title: impl Into<String>, call: ToolCallSpec) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind: StepKind::McpCall,
            tool_call: Some(call),
            children: Vec::new(),
            status: StepStatus::Pending,
            started_ts: None,
            ended_ts: None,
            error: None,
            result_summary: None,
            result_raw: None,
        }
    }

    /// Structural validation independent of execution state: a `note` or
    /// `mcp_call` step must not carry children; an `mcp_call` step must
    /// carry `tool_id`, `method`, and `path`.
    pub fn validate_shape(&self) -> Result<(), String> {
        match self.kind {
            StepKind::Note => {
                if !self.children.is_empty() {
                    return Err(format!("step {}: note step must not have children", self.id));
                }
            }
            StepKind::McpCall => {
                if !self.children.is_empty() {
                    return Err(format!(
                        "step {}: mcp_call step must not have children",
                        self.id
                    ));
                }
                let call = self
                    .tool_call
                    .as_ref()
                    .ok_or_else(|| format!("step {}: mcp_call step missing tool_call", self.id))?;
                if call.tool_id.is_empty() {
                    return Err(format!("step {}: mcp_call missing tool_id", self.id));
                }
                if call.method.is_none() {
                    return Err(format!("step {}: mcp_call missing method", self.id));
                }
                if call.path.as_deref().unwrap_or("").is_empty() {
                    return Err(format!("step {}: mcp_call missing path", self.id));
                }
            }
            StepKind::Subplan => {}
        }
        Ok(())
    }
}

/// Overall lifecycle status of a plan's execution (distinct from the
/// persistent wrapper's status — see `run_state::RunLifecycleStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Done,
    Error,
}

/// An ordered tree of steps plus the executor's cursor and terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRun {
    pub id: String,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
    pub created_ts: i64,
    #[serde(default)]
    pub ended_ts: Option<i64>,
    #[serde(default)]
    pub current_step_path: Option<String>,
}

impl PlanRun {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, steps: Vec<PlanStep>, now_ms: i64) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            steps,
            status: PlanStatus::Pending,
            created_ts: now_ms,
            ended_ts: None,
            current_step_path: None,
        }
    }

    pub fn flatten(&self) -> Vec<(String, &PlanStep)> {
        let mut out = Vec::new();
        flatten_steps(&self.steps, "", &mut out);
        out
    }

    /// Look up a step by its dotted DFS path (e.g. `"2.1"`), mutably.
    pub fn step_at_mut(&mut self, path: &str) -> Option<&mut PlanStep> {
        let indices: Vec<usize> = path
            .split('.')
            .map(|s| s.parse::<usize>().ok().map(|n| n.saturating_sub(1)))
            .collect::<Option<Vec<_>>>()?;
        step_at_mut_rec(&mut self.steps, &indices)
    }
}

fn step_at_mut_rec<'a>(steps: &'a mut [PlanStep], indices: &[usize]) -> Option<&'a mut PlanStep> {
    let (&head, rest) = indices.split_first()?;
    let step = steps.get_mut(head)?;
    if rest.is_empty() {
        Some(step)
    } else {
        step_at_mut_rec(&mut step.children, rest)
    }
}

/// Depth-first step numbering: top-level steps are `1, 2, …`; the children
/// of step `k` are `k.1, k.2, …` recursively. E.g. given steps with
/// children `[[A, B], [C]]` (first step has two children, second has one),
/// the emitted paths are `1, 1.1, 1.2, 2, 2.1` in that order.
pub fn flatten_steps<'a>(steps: &'a [PlanStep], prefix: &str, out: &mut Vec<(String, &'a PlanStep)>) {
    for (i, step) in steps.iter().enumerate() {
        let path = if prefix.is_empty() {
            format!("{}", i + 1)
        } else {
            format!("{prefix}.{}", i + 1)
        };
        out.push((path.clone(), step));
        if !step.children.is_empty() {
            flatten_steps(&step.children, &path, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str) -> PlanStep {
        PlanStep::note(id, id)
    }

    #[test]
    fn dfs_path_numbering_matches_nested_example() {
        let a = leaf("A");
        let b = leaf("B");
        let c = leaf("C");
        let mut first = PlanStep::note("s1", "first");
        first.kind = StepKind::Subplan;
        first.children = vec![a, b];
        let mut second = PlanStep::note("s2", "second");
        second.kind = StepKind::Subplan;
        second.children = vec![c];

        let steps = vec![first, second];
        let mut out = Vec::new();
        flatten_steps(&steps, "", &mut out);
        let paths: Vec<String> = out.into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["1", "1.1", "1.2", "2", "2.1"]);
    }

    #[test]
    fn note_step_with_children_fails_validation() {
        let mut step = PlanStep::note("x", "bad");
        step.children.push(leaf("y"));
        assert!(step.validate_shape().is_err());
    }

    #[test]
    fn mcp_call_requires_tool_id_method_path() {
        let step = PlanStep::mcp_call(
            "x",
            "call",
            ToolCallSpec {
                tool_id: String::new(),
                method: Some(HttpMethod::Post),
                path: Some("/command".into()),
                query: None,
                body: None,
            },
        );
        assert!(step.validate_shape().is_err());
    }
}
