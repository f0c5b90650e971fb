use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use cron::Schedule;
use tracing::{error, info, warn};

use crate::orchestrator::Orchestrator;
use crate::types::Result;

/// Cron schedule as a pure "time → next fire time" function.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: Schedule,
    expr: String,
}

impl CronSchedule {
    /// Parse a cron expression. Classic five-field expressions
    /// ("0 * * * *") are accepted by prepending a seconds field.
    pub fn parse(expr: &str) -> Result<Self> {
        let normalized = normalize(expr);
        let schedule = Schedule::from_str(&normalized)?;
        Ok(Self {
            schedule,
            expr: normalized,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(&now).next()
    }
}

fn normalize(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}

/// Single cooperative timer loop: sleep until the next fire time, then spawn
/// a cycle. Cycles are spawned rather than awaited so a trigger firing while
/// the previous cycle still runs reaches the orchestrator, which drops it.
pub async fn run(orchestrator: Arc<Orchestrator>, schedule: CronSchedule) -> Result<()> {
    loop {
        let now = Local::now();
        let Some(next) = schedule.next_after(now) else {
            warn!(expr = schedule.expression(), "cron schedule has no future fire time, stopping");
            return Ok(());
        };

        let wait = (next - now).to_std().unwrap_or_default();
        info!(
            next = %next.format("%Y-%m-%d %H:%M:%S"),
            minutes = wait.as_secs() / 60,
            "sleeping until the next cycle"
        );
        tokio::time::sleep(wait).await;

        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_cycle().await {
                error!(error = %e, "poll cycle failed");
            }
        });
    }
}
