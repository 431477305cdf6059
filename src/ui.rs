//! Terminal front end: one spinner per running job and colored summaries.
//!
//! [`JobBoard`] turns orchestrator [`JobEvent`]s into `indicatif` spinners
//! and progress lines. The `print_*` helpers render stored state for the
//! `status`, `run` and `routes` commands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

use recruitflow::orchestrator::{JobEvent, Observer};
use recruitflow::provider::TaskClass;
use recruitflow::router::ProviderRouter;
use recruitflow::workflow::{JobSummary, Stage, Transition, WorkUnit};

/// Live view of the jobs a `run` is driving.
pub struct JobBoard {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobBoard {
    pub fn new() -> Arc<Self> {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    fn with_target(target: ProgressDrawTarget) -> Arc<Self> {
        Arc::new(Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(HashMap::new()),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        })
    }

    /// Callback to hand to `Orchestrator::with_observer`.
    pub fn observer(self: &Arc<Self>) -> Observer {
        let board = Arc::clone(self);
        Arc::new(move |event: &JobEvent| board.handle(event))
    }

    pub fn handle(&self, event: &JobEvent) {
        match event {
            JobEvent::Invoking { job_id, unit } => {
                let bar = self.bar(job_id);
                bar.set_message(format!("{job_id} {}: {}", unit.stage(), unit_label(unit)));
            }
            JobEvent::Transitioned { job_id, transition } => match transition {
                Transition::Advance { from, to } => {
                    self.line(format!(
                        "  {} {job_id} {from} → {to}",
                        self.green.apply_to("✓")
                    ));
                    if to.is_terminal() {
                        self.finish_job(job_id);
                    }
                }
                Transition::Retry { stage, attempt } => self.line(format!(
                    "  {} {job_id} retrying {stage} (attempt {attempt})",
                    self.yellow.apply_to("↻")
                )),
                Transition::Fail(failure) => {
                    self.line(format!(
                        "  {} {job_id} failed in {}: {}",
                        self.red.apply_to("✗"),
                        failure.stage,
                        failure.message
                    ));
                    self.finish_job(job_id);
                }
                Transition::Continue(_) | Transition::Halted(_) => {}
            },
            JobEvent::Degraded { job_id, routing } => self.line(format!(
                "  {} {job_id} {}: {} unavailable, using {}",
                self.yellow.apply_to("⚠"),
                routing.task_class,
                routing.primary,
                routing.selected
            )),
        }
    }

    /// Clears every spinner still on screen.
    pub fn finish(&self) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        for (_, bar) in bars.drain() {
            bar.finish_and_clear();
        }
    }

    fn bar(&self, job_id: &str) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        bars.entry(job_id.to_string())
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.cyan} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            })
            .clone()
    }

    fn finish_job(&self, job_id: &str) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = bars.remove(job_id) {
            bar.finish_and_clear();
        }
    }

    fn line(&self, text: String) {
        if let Err(e) = self.multi.println(text) {
            debug!(error = %e, "progress line not written");
        }
    }
}

fn unit_label(unit: &WorkUnit) -> String {
    match unit {
        WorkUnit::Source => "searching candidate sources".to_string(),
        WorkUnit::Screen(id) => format!("screening candidate {}", short_id(id)),
        WorkUnit::Assess(id) => format!("assessing candidate {}", short_id(id)),
        WorkUnit::Engage(id) => format!("drafting outreach for {}", short_id(id)),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn stage_style(stage: Stage) -> Style {
    match stage {
        Stage::Completed => Style::new().green().bold(),
        Stage::Failed => Style::new().red().bold(),
        _ => Style::new().yellow(),
    }
}

/// Plain-text body of a job summary, without the header.
fn summary_lines(summary: &JobSummary) -> Vec<String> {
    let mut lines = vec![
        format!("  stage     {} (attempts {})", summary.stage, summary.attempts),
        format!(
            "  pipeline  sourced {} · qualified {} · assessed {} · drafted {}",
            summary.sourced, summary.qualified, summary.assessed, summary.drafted
        ),
        format!(
            "  tokens    in {} · out {}",
            summary.usage.input_tokens, summary.usage.output_tokens
        ),
    ];
    if summary.degraded_routings > 0 {
        lines.push(format!(
            "  degraded  {} call(s) served by a fallback provider",
            summary.degraded_routings
        ));
    }
    if let Some(err) = &summary.last_error {
        lines.push(format!(
            "  error     [{} in {}] {}",
            err.kind, err.stage, err.message
        ));
    }
    for id in &summary.awaiting_review {
        let who = summary
            .ranked
            .iter()
            .find(|r| &r.candidate_id == id)
            .map(|r| format!("{} ({:.1})", r.name, r.score))
            .unwrap_or_default();
        lines.push(format!("  review    {id} {who}"));
    }
    if !summary.ranked.is_empty() {
        lines.push("  ranking".to_string());
        for (pos, candidate) in summary.ranked.iter().enumerate() {
            let name = if candidate.name.is_empty() {
                short_id(&candidate.candidate_id)
            } else {
                candidate.name.as_str()
            };
            lines.push(format!(
                "    {}. {name:<24} {:>5.1}  {}",
                pos + 1,
                candidate.score,
                candidate.reasons.join("; ")
            ));
        }
    }
    lines
}

pub fn print_summary(summary: &JobSummary) {
    let style = stage_style(summary.stage);
    println!();
    println!(
        "{}",
        style.apply_to(format!("─── {} · {} ───", summary.job_id, summary.title))
    );
    for line in summary_lines(summary) {
        println!("{line}");
    }
}

/// One line per stored job.
pub fn print_status_table(summaries: &[JobSummary]) {
    if summaries.is_empty() {
        println!("no jobs submitted");
        return;
    }
    for s in summaries {
        println!(
            "{:<38} {} {:<28} qualified {:>3}  drafted {:>3}",
            s.job_id,
            stage_style(s.stage).apply_to(format!("{:<10}", s.stage.to_string())),
            s.title,
            s.qualified,
            s.drafted
        );
    }
}

pub fn print_routes(router: &ProviderRouter) {
    let green = Style::new().green();
    let red = Style::new().red();
    for task_class in TaskClass::ALL {
        println!("{task_class}");
        for (pos, handle) in router.chain(task_class).iter().enumerate() {
            let health = if router.health().is_healthy(&handle.provider) {
                green.apply_to("healthy")
            } else {
                red.apply_to("unhealthy")
            };
            println!("  {}. {handle} [{}] {health}", pos + 1, handle.cost_tier);
        }
    }
}
