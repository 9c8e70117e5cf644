use maxmin_core::{Extremum, PeriodKind, Result};

use super::Context;

pub fn run(
    ctx: &Context,
    period: PeriodKind,
    extremum: Extremum,
) -> Result<()> {
    let mut db = ctx.open_db()?;
    db.forget(period, extremum)?;
    println!("forgot {period} {extremum}");
    Ok(())
}
