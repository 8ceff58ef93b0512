//! Run commands: `ihx run`, `ihx ocr`, and `ihx runs list|get|replay`.

use anyhow::{Context, Result};
use std::path::Path;

use incident_harness_core::models::{format_ts_iso, Run, RunId, RunQuery};

use crate::config::Config;
use crate::pipeline::{build_pipeline, RunOptions, RunOutcome};

pub async fn run_incident(config: &Config, text: &str, opts: &RunOptions) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let outcome = pipeline.run(text, opts).await?;
    print_outcome(&outcome);
    Ok(())
}

pub async fn run_ocr(config: &Config, image: &Path, opts: &RunOptions) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read image: {}", image.display()))?;
    let filename = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.display().to_string());

    let pipeline = build_pipeline(config).await?;
    let outcome = pipeline.run_image(&bytes, &filename, opts).await?;
    print_outcome(&outcome);
    Ok(())
}

pub async fn list_runs(config: &Config, query: &RunQuery) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let runs = pipeline.list_runs(query).await?;
    if runs.is_empty() {
        println!("No runs.");
        return Ok(());
    }
    for run in &runs {
        println!(
            "run {:<6} incident {:<6} {}  conf={:.2}  {:<12} {}",
            run.id,
            run.incident_id,
            format_ts_iso(run.created_at),
            run.plan.confidence,
            run.plan
                .next_action
                .map(|a| a.as_str())
                .unwrap_or("-"),
            run.action_status,
        );
    }
    Ok(())
}

pub async fn get_run(config: &Config, id: RunId) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let run = pipeline.get_run(id).await?;
    print_run(&run);
    Ok(())
}

pub async fn replay_run(config: &Config, id: RunId, notify: bool) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let outcome = pipeline.replay(id, notify).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_steps(title: &str, items: &[String]) {
    println!("--- {} ({}) ---", title, items.len());
    for item in items {
        println!("- {}", item);
    }
    println!();
}

fn print_outcome(outcome: &RunOutcome) {
    println!("incident_id:    {}", outcome.incident_id);
    println!("run_id:         {}", outcome.run_id);
    if let Some(from) = outcome.replayed_from {
        println!("replayed_from:  {}", from);
    }
    println!("confidence:     {:.2}", outcome.confidence);
    println!("next_action:    {}", outcome.next_action);
    println!("needs_approval: {}", outcome.needs_approval);
    println!("action_status:  {}", outcome.action_status);
    if let Some(ticket) = outcome.ticket.as_ref().and_then(|t| t.key.as_deref()) {
        println!("ticket:         {}", ticket);
    }
    println!("retrieved:      {:?}", outcome.retrieved_ids);
    println!();
    print_steps("Steps", &outcome.plan.steps);
    print_steps("Risks", &outcome.plan.risks);
}

fn print_run(run: &Run) {
    println!("--- Run ---");
    println!("id:            {}", run.id);
    println!("incident_id:   {}", run.incident_id);
    println!("created_at:    {}", format_ts_iso(run.created_at));
    println!("confidence:    {:.2}", run.plan.confidence);
    if let Some(action) = run.plan.next_action {
        println!("next_action:   {}", action);
    }
    if let Some(category) = &run.plan.category {
        println!("category:      {}", category);
    }
    println!("action_status: {}", run.action_status);
    println!("retrieved:     {:?}", run.retrieved_ids);
    println!("summary:       {}", run.final_summary);
    println!();
    print_steps("Steps", &run.plan.steps);
    print_steps("Risks", &run.plan.risks);
}
