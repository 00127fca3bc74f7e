//! `recall search` and `recall delete`.

use anyhow::{bail, Context, Result};

use recall_harness_core::filter::{Filter, Predicate};
use recall_harness_core::models::IndexSchema;
use recall_harness_core::search::DeleteTarget;

use crate::config::Config;
use crate::harness::Harness;
use crate::ingest::{parse_value, split_pair};

pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    values: Vec<String>,
    wheres: Vec<String>,
    ranges: Vec<String>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let harness = Harness::open(config).await?;
    let vs = harness.vector_store();
    let filter = build_filter(vs.schema(), values, &wheres, &ranges)?;
    let k = k.unwrap_or(config.retrieval.default_k);

    let results = vs
        .similarity_search_with_score(query, k, filter.as_ref())
        .await?;

    if results.is_empty() {
        println!("No results.");
        harness.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let doc = &result.document;
        println!(
            "{}. [{:.4}] {}",
            i + 1,
            result.score,
            doc.id.as_deref().unwrap_or("(no id)")
        );
        if !doc.metadata.is_empty() {
            let meta: Vec<String> = doc
                .metadata
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            println!("    metadata: {}", meta.join(", "));
        }
        println!("    content: \"{}\"", doc.content.replace('\n', " ").trim());
        println!();
    }

    harness.close().await;
    Ok(())
}

pub async fn run_delete(config: &Config, ids: Vec<String>, all: bool) -> Result<()> {
    let target = match (all, ids.is_empty()) {
        (true, true) => DeleteTarget::All,
        (true, false) => bail!("Pass either document ids or --all, not both."),
        (false, true) => bail!("Nothing to delete. Pass document ids or --all."),
        (false, false) => DeleteTarget::Ids(ids),
    };

    let harness = Harness::open(config).await?;
    let removed = harness.vector_store().delete(&target).await?;
    println!("deleted documents: {}", removed);
    harness.close().await;
    Ok(())
}

/// Combine `--filter`, `--where` and `--range` flags into one filter.
pub fn build_filter(
    schema: &IndexSchema,
    values: Vec<String>,
    wheres: &[String],
    ranges: &[String],
) -> Result<Option<Filter>> {
    if wheres.is_empty() && ranges.is_empty() {
        return Ok(if values.is_empty() {
            None
        } else {
            Some(Filter::Values(values))
        });
    }
    if !values.is_empty() {
        bail!("--filter cannot be combined with --where or --range");
    }

    let mut predicates = Vec::with_capacity(wheres.len() + ranges.len());
    for clause in wheres {
        let (field, raw) = split_pair(clause, '=')?;
        predicates.push(Predicate::eq(field, parse_value(schema, field, raw)?));
    }
    for clause in ranges {
        predicates.push(parse_range(clause)?);
    }

    let predicate = if predicates.len() == 1 {
        predicates.remove(0)
    } else {
        Predicate::And(predicates)
    };
    Ok(Some(Filter::Predicate(predicate)))
}

/// Parse `field=min..max`; either bound may be empty.
fn parse_range(clause: &str) -> Result<Predicate> {
    let (field, bounds) = split_pair(clause, '=')?;
    let (min, max) = bounds
        .split_once("..")
        .with_context(|| format!("Expected field=min..max, got '{}'", clause))?;
    Ok(Predicate::range(field, parse_bound(min)?, parse_bound(max)?))
}

fn parse_bound(raw: &str) -> Result<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .with_context(|| format!("Range bound '{}' is not a number", raw))
}
