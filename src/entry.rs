//! Wires the other components together: validates the input app definition, runs the planner,
//! shows the operator what will be created, and launches the controller unless dry-run.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cli::Cli;
use crate::confirm::{Confirm, ForceConfirm, StdinConfirm};
use crate::controller::Controller;
use crate::error::CutoverError;
use crate::model::{AppDef, LABEL_ALT_PORT, LABEL_GROUP};
use crate::planner;
use crate::proxystats::{ProxyStats, ProxyStatsAggregator};
use crate::scheduler::{SchedulerApi, SchedulerClient};

/// Validates presence of the fields the core reads, per the documented input contract.
fn validate_input(app: &AppDef) -> Result<(), CutoverError> {
    if app.id().is_none() {
        return Err(CutoverError::Validation("app definition is missing id".into()));
    }
    if app.label(LABEL_GROUP).is_none() {
        return Err(CutoverError::Validation(format!("app definition is missing label {LABEL_GROUP}")));
    }
    if app.label(LABEL_ALT_PORT).is_none() {
        return Err(CutoverError::Validation(format!(
            "app definition is missing label {LABEL_ALT_PORT}"
        )));
    }
    if app.get_service_port().is_none() {
        return Err(CutoverError::Validation(
            "app definition is missing a service port (ports[0] or container.docker.portMappings[0].servicePort)".into(),
        ));
    }
    Ok(())
}

pub async fn run(cli: Cli) -> Result<(), CutoverError> {
    let input_text = std::fs::read_to_string(&cli.json)
        .map_err(|err| CutoverError::Validation(format!("reading {}: {err}", cli.json)))?;
    let input_value: Value = serde_json::from_str(&input_text)
        .map_err(|err| CutoverError::Validation(format!("parsing {}: {err}", cli.json)))?;
    let input = AppDef::from_value(input_value).map_err(CutoverError::Validation)?;
    validate_input(&input)?;

    let scheduler: Arc<dyn SchedulerApi> =
        Arc::new(SchedulerClient::new(cli.marathon.clone(), cli.credentials()));

    let apps = scheduler.list_apps().await?;
    let plan = planner::plan(&input, &apps, cli.resume, cli.initial_instances)?;

    let rendered = serde_json::to_string_pretty(&plan.new_app.to_value())
        .expect("serializing an AppDef back to JSON never fails");
    println!("{rendered}");

    if cli.dry_run {
        tracing::info!("dry run requested, not contacting the scheduler further");
        return Ok(());
    }

    let confirm: Arc<dyn Confirm> = if cli.force {
        Arc::new(ForceConfirm)
    } else {
        Arc::new(StdinConfirm)
    };

    let Some(existing_app) = plan.existing_app else {
        if !cli.force && !confirm.ask(&format!("Create {}?", plan.new_app.id().unwrap_or_default())).await {
            return Ok(());
        }
        scheduler.create_app(&plan.new_app).await?;
        tracing::info!(id = plan.new_app.id(), "created app, no existing app to cut over from");
        return Ok(());
    };

    let new_app_id = plan
        .new_app
        .id()
        .ok_or_else(|| CutoverError::Validation("planned app is missing id".into()))?
        .to_string();
    let old_app_id = existing_app
        .id()
        .ok_or_else(|| CutoverError::Validation("existing app is missing id".into()))?
        .to_string();

    if !plan.resuming {
        if !cli.force && !confirm.ask(&format!("Create {new_app_id}?")).await {
            return Ok(());
        }
        scheduler.create_app(&plan.new_app).await?;
    }

    let group = input.label(LABEL_GROUP).expect("validated above");
    let service_port = input.get_service_port().expect("validated above");
    let pxname = format!("{group}_{service_port}");

    let lb_url = url::Url::parse(&cli.marathon_lb)
        .map_err(|err| CutoverError::Validation(format!("invalid --marathon-lb URL: {err}")))?;
    let proxy: Arc<dyn ProxyStats> = Arc::new(ProxyStatsAggregator::new(lb_url));

    let controller = Controller::new(
        scheduler,
        proxy,
        confirm,
        Duration::from_secs(cli.step_delay),
        cli.force,
    );
    controller.run(&pxname, &new_app_id, &old_app_id).await
}
