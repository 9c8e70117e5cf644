use std::collections::BTreeMap;

use maxmin_core::{Field, PeriodKind, Result};
use serde::Serialize;

use super::Context;

#[derive(Default, Serialize)]
struct PeriodStatus {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<Field, f64>,
    last_reset: Option<String>,
}

pub fn run(ctx: &Context) -> Result<()> {
    let db = ctx.open_db()?;
    let mut status: BTreeMap<PeriodKind, PeriodStatus> = BTreeMap::new();
    for record in db.load_records()? {
        let entry = status.entry(record.period).or_default();
        entry.values.insert(record.field, record.value);
        if record.last_reset.is_some() {
            entry.last_reset = record.last_reset;
        }
    }
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
