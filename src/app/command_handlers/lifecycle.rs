use crate::api::PlannerApi;
use crate::app::command_support::{enter_target, map_lifecycle_err, render_footer};
use crate::orchestrator::WorkflowSession;

fn target(args: &[String], usage: &str) -> Result<String, String> {
    match args {
        [target] if target != "new" => Ok(target.clone()),
        _ => Err(format!("usage: {usage} <conversation>")),
    }
}

pub fn cmd_save<A: PlannerApi>(
    session: &mut WorkflowSession<A>,
    args: &[String],
) -> Result<String, String> {
    let mut lines = enter_target(session, &target(args, "save")?)?;
    let flow_id = session.save().map_err(map_lifecycle_err)?;
    lines.push(format!("saved flow {flow_id}"));
    lines.extend(render_footer(session));
    Ok(lines.join("\n"))
}

pub fn cmd_set_active<A: PlannerApi>(
    session: &mut WorkflowSession<A>,
    args: &[String],
    desired: bool,
) -> Result<String, String> {
    let usage = if desired { "activate" } else { "deactivate" };
    let mut lines = enter_target(session, &target(args, usage)?)?;
    let result = if desired {
        session.activate()
    } else {
        session.deactivate()
    };
    let is_active = result.map_err(map_lifecycle_err)?;
    if is_active != desired {
        lines.push(format!(
            "the workflow service kept the flow {}",
            if is_active { "active" } else { "inactive" }
        ));
    } else {
        lines.push(format!(
            "flow is now {}",
            if is_active { "active" } else { "inactive" }
        ));
    }
    lines.extend(render_footer(session));
    Ok(lines.join("\n"))
}

pub fn cmd_execute<A: PlannerApi>(
    session: &mut WorkflowSession<A>,
    args: &[String],
) -> Result<String, String> {
    let mut lines = enter_target(session, &target(args, "execute")?)?;
    let report = session.execute().map_err(map_lifecycle_err)?;
    lines.push(report.summary());
    lines.extend(render_footer(session));
    Ok(lines.join("\n"))
}
