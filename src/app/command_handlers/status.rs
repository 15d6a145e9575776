use crate::api::PlannerApi;
use crate::app::command_support::{enter_target, render_footer};
use crate::orchestrator::WorkflowSession;

pub fn cmd_status<A: PlannerApi>(
    session: &mut WorkflowSession<A>,
    args: &[String],
) -> Result<String, String> {
    let [target] = args else {
        return Err("usage: status <conversation>".to_string());
    };
    let mut lines = enter_target(session, target)?;
    lines.extend(render_footer(session));

    let lifecycle = session.lifecycle();
    match lifecycle.flow_id.as_ref() {
        Some(flow_id) => lines.push(format!(
            "flow: {flow_id} ({})",
            if lifecycle.active { "active" } else { "inactive" }
        )),
        None => lines.push("flow: not saved".to_string()),
    }

    let Some(plan) = session.plan() else {
        lines.push("plan: none".to_string());
        return Ok(lines.join("\n"));
    };
    lines.push(format!("plan: {} step(s)", plan.len()));
    for (position, step) in plan.ordered_steps().into_iter().enumerate() {
        let missing = step.missing_required_parameters();
        let mut line = format!(
            "  {}. {} ({}/{})",
            position + 1,
            step.display_name(),
            step.node_id,
            step.action_id
        );
        if !missing.is_empty() {
            line.push_str(&format!(" missing: {}", missing.join(", ")));
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}
