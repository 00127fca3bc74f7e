use anyhow::Result;

use recall_harness_core::index::IndexStatus;
use recall_harness_core::models::IndexSchema;
use recall_harness_core::store::KeyValueStore;

use crate::config::Config;
use crate::harness::Harness;

pub async fn run_index_create(config: &Config) -> Result<()> {
    let harness = Harness::open(config).await?;
    let status = harness.vector_store().ensure_index().await?;
    match status {
        IndexStatus::Created => println!("created index {}", config.index.name),
        IndexStatus::Existing => println!("index {} exists", config.index.name),
    }
    harness.close().await;
    Ok(())
}

pub async fn run_index_info(config: &Config) -> Result<()> {
    let harness = Harness::open(config).await?;
    let vs = harness.vector_store();
    match vs.index_info().await? {
        Some(schema) => {
            print_schema(&schema);
            let documents = harness.store().keys_with_prefix(&schema.key_prefix).await?;
            println!("documents:  {}", documents.len());
        }
        None => println!("index not found: {}", config.index.name),
    }
    harness.close().await;
    Ok(())
}

pub async fn run_index_drop(config: &Config, delete_documents: bool) -> Result<()> {
    let harness = Harness::open(config).await?;
    harness.vector_store().drop_index(delete_documents).await?;
    if delete_documents {
        println!("dropped index {} and its documents", config.index.name);
    } else {
        println!("dropped index {}", config.index.name);
    }
    harness.close().await;
    Ok(())
}

fn print_schema(schema: &IndexSchema) {
    println!("--- Index ---");
    println!("name:       {}", schema.name);
    println!("key_prefix: {}", schema.key_prefix);
    println!("dims:       {}", schema.dims);
    println!("metric:     {}", schema.metric);
    if schema.metadata_fields.is_empty() {
        println!("fields:     (none)");
    } else {
        for (name, kind) in &schema.metadata_fields {
            println!("field:      {} ({})", name, kind);
        }
    }
}
