//! `ihx search`: hybrid search from the command line.

use anyhow::Result;

use incident_harness_core::models::truncate_chars;
use incident_harness_core::search::SearchFilters;

use crate::config::Config;
use crate::pipeline::build_pipeline;

pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    filters: SearchFilters,
) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let hits = pipeline.search(query, top_k, &filters).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.4}] chunk {}  svc={} code={} env={}",
            i + 1,
            hit.score,
            hit.chunk_id,
            hit.metadata.service.as_deref().unwrap_or("-"),
            hit.metadata.error_code.as_deref().unwrap_or("-"),
            hit.metadata.env.as_deref().unwrap_or("-"),
        );
        println!("    {}", truncate_chars(&hit.text, 160).replace('\n', " "));
        println!();
    }

    Ok(())
}
