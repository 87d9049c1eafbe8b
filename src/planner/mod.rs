//! Derives the next color, internal port, attached existing app, and resume state for a
//! deployment group from the scheduler's current app list.

use chrono::Utc;

use crate::error::CutoverError;
use crate::model::{
    AppDef, Colour, LABEL_0_PORT, LABEL_ALT_PORT, LABEL_APP_ID, LABEL_COLOUR, LABEL_GROUP,
    LABEL_STARTED_AT, LABEL_TARGET_INSTANCES,
};

pub struct Plan {
    pub colour: Colour,
    pub next_port: u16,
    pub existing_app: Option<AppDef>,
    pub resuming: bool,
    /// The rewritten definition to create (or, when resuming, the already-running new app).
    pub new_app: AppDef,
}

/// Scans `apps` for the deployment group named on `input`, then derives the next deployment
/// state per the zero/one/two-match rules.
pub fn plan(input: &AppDef, apps: &[AppDef], resume: bool, initial_instances: i64) -> Result<Plan, CutoverError> {
    let group = input
        .label(LABEL_GROUP)
        .ok_or_else(|| CutoverError::Validation(format!("missing label {LABEL_GROUP}")))?;
    let alt_port: u16 = input
        .label(LABEL_ALT_PORT)
        .ok_or_else(|| CutoverError::Validation(format!("missing label {LABEL_ALT_PORT}")))?
        .parse()
        .map_err(|_| CutoverError::Validation(format!("{LABEL_ALT_PORT} is not a valid port")))?;
    let original_id = input
        .id()
        .ok_or_else(|| CutoverError::Validation("missing id".into()))?
        .to_string();
    let service_port = input
        .get_service_port()
        .ok_or_else(|| CutoverError::Validation("missing service port".into()))?;

    let mut matches: Vec<&AppDef> = apps
        .iter()
        .filter(|app| {
            app.label(LABEL_GROUP).as_deref() == Some(group.as_str())
                && app.label(LABEL_COLOUR).is_some()
        })
        .collect();

    let (colour, next_port, existing_app, resuming, new_app_base, target_instances) =
        match matches.len() {
            0 => (
                Colour::Blue,
                alt_port,
                None,
                false,
                input.clone(),
                input.instances().unwrap_or(initial_instances),
            ),
            1 => {
                let existing = matches.remove(0);
                let existing_colour: Colour = existing
                    .label(LABEL_COLOUR)
                    .unwrap()
                    .parse()
                    .map_err(CutoverError::Validation)?;
                let colour = existing_colour.opposite();
                let next_port = if existing.get_service_port() == Some(alt_port) {
                    existing
                        .label(LABEL_0_PORT)
                        .and_then(|p| p.parse().ok())
                        .ok_or_else(|| {
                            CutoverError::Validation(format!("existing app missing {LABEL_0_PORT}"))
                        })?
                } else {
                    alt_port
                };
                let target = existing.instances().unwrap_or(initial_instances);
                (
                    colour,
                    next_port,
                    Some(existing.clone()),
                    false,
                    input.clone(),
                    target,
                )
            }
            _ => {
                if !resume {
                    return Err(CutoverError::ConcurrentDeployment(format!(
                        "two apps already exist for deployment group {group}"
                    )));
                }
                matches.sort_by_key(|app| app.label(LABEL_STARTED_AT).unwrap_or_default());
                let old = matches[0].clone();
                let new = matches[1].clone();
                let colour: Colour = new
                    .label(LABEL_COLOUR)
                    .ok_or_else(|| CutoverError::Validation(format!("missing label {LABEL_COLOUR}")))?
                    .parse()
                    .map_err(CutoverError::Validation)?;
                let next_port = new
                    .get_service_port()
                    .ok_or_else(|| CutoverError::Validation("resumed app missing port".into()))?;
                let target = old.instances().unwrap_or(initial_instances);
                (colour, next_port, Some(old), true, new, target)
            }
        };

    let mut new_app = new_app_base;
    if !resuming {
        let coloured_id = format!("/{}-{}", original_id.trim_start_matches('/'), colour);
        new_app.set_id(coloured_id);
        if existing_app.is_some() {
            new_app.set_instances(initial_instances);
        }
        new_app.set_label(LABEL_TARGET_INSTANCES, target_instances.to_string());
        new_app.set_label(LABEL_COLOUR, colour.as_str());
        new_app.set_label(LABEL_STARTED_AT, Utc::now().to_rfc3339());
        new_app.set_label(LABEL_0_PORT, service_port.to_string());
        new_app.set_label(LABEL_APP_ID, original_id.clone());
        new_app.set_service_port(next_port);
    }

    Ok(Plan {
        colour,
        next_port,
        existing_app,
        resuming,
        new_app,
    })
}
