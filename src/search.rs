//! `trove search`: hybrid visual/textual retrieval from the command line.
//!
//! Results are printed in rank order with their trust breakdown:
//!
//! ```text
//! 1. [83.3] food / sushi  (visual_confirmation)
//!     source: food/sushi/0042.jpg
//!     trust: visual 0.97, textual 0.00, intent 1.00
//!     excerpt: "SALMON NIGIRI 6.50"
//! ```

use anyhow::{bail, Result};
use std::path::PathBuf;

use trove_core::retrieval::{Retriever, SearchQuery, SearchResponse};

use crate::config::Config;
use crate::ingest::IngestPorts;

/// Build a retriever over the given ports with the configured parameters.
pub fn build_retriever(config: &Config, ports: &IngestPorts) -> Retriever {
    Retriever::new(
        ports.embedder.clone(),
        ports.store.clone(),
        ports.ocr.clone(),
        ports.arbiter.clone(),
        config.dataset.domains.clone(),
        config.retrieval.params(),
    )
}

pub async fn run_search(
    config: &Config,
    image: Option<PathBuf>,
    text: Option<String>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let text = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    if image.is_none() && text.is_none() {
        bail!("search needs --image, --text, or both");
    }
    if let Some(path) = &image {
        if !path.is_file() {
            bail!("query image not found: {}", path.display());
        }
    }

    let ports = IngestPorts::from_config(config).await?;
    let retriever = build_retriever(config, &ports);
    let k = limit.unwrap_or(config.retrieval.final_limit).max(1);
    let response = retriever.search(&SearchQuery { image, text }, k).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &SearchResponse) {
    if let Some(consensus) = &response.consensus {
        println!(
            "label: {} ({:?}, {} votes)",
            consensus.label, consensus.source, consensus.votes
        );
    }
    if let Some(intent) = &response.intent {
        println!(
            "intent: domain={} label={}",
            intent.domain.as_deref().unwrap_or("-"),
            intent.label.as_deref().unwrap_or("-")
        );
    }

    if response.results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, result) in response.results.iter().enumerate() {
        let record = &result.record;
        let category = match result.category {
            trove_core::retrieval::ResultCategory::VisualConfirmation => "visual_confirmation",
            trove_core::retrieval::ResultCategory::EnrichedInfo => "enriched_info",
        };
        println!(
            "{}. [{:.1}] {} / {}  ({})",
            i + 1,
            result.trust.confidence,
            record.domain,
            record.label,
            category
        );
        println!("    source: {}", record.source);
        println!(
            "    trust: visual {:.2}, textual {:.2}, intent {:.2}",
            result.trust.visual, result.trust.textual, result.trust.intent
        );
        let excerpt = record.content_excerpt.replace('\n', " ");
        if !excerpt.trim().is_empty() {
            println!("    excerpt: \"{}\"", excerpt.trim());
        }
        println!();
    }
}
