//! `mweave audit` -- display a run's audit trail.

use comfy_table::{Table, presets::UTF8_FULL};
use serde_json::Value;

use mathweave_core::audit::read_trail;
use mathweave_types::run::{AuditEvent, RunId};

use super::{GlobalOpts, Paths};

/// Print every recorded event of `run_id`, oldest first.
pub async fn audit_show(_opts: &GlobalOpts, run_id: &str, json: bool) -> anyhow::Result<()> {
    let paths = Paths::discover();
    let trail = read_trail(&paths.audit(), &RunId::from(run_id)).await?;

    if json {
        for event in &trail.events {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["SEQ", "AT", "STAGE", "EVENT", "DETAIL"]);
    for event in &trail.events {
        let (stage, kind, detail) = describe(event)?;
        table.add_row([
            event.seq.to_string(),
            event.at.format("%H:%M:%S%.3f").to_string(),
            stage,
            kind,
            detail,
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Split an event into its stage name, event name and the remaining fields
/// as compact JSON.
fn describe(event: &AuditEvent) -> anyhow::Result<(String, String, String)> {
    let mut value = serde_json::to_value(event)?;
    let Some(map) = value.as_object_mut() else {
        anyhow::bail!("audit event did not serialize to an object");
    };
    let take = |map: &mut serde_json::Map<String, Value>, key: &str| match map.remove(key) {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let stage = take(map, "stage");
    let kind = take(map, "event");
    map.remove("seq");
    map.remove("at");
    let detail = Value::Object(map.clone()).to_string();
    Ok((stage, kind, shorten(&detail, 100)))
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}…")
}
