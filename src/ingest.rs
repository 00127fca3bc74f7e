//! `recall add`: ingest texts and files into the configured index.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use recall_harness_core::ingest::AddOptions;
use recall_harness_core::models::{Document, FieldKind, IndexSchema, Metadata, MetadataValue};

use crate::config::Config;
use crate::harness::Harness;

pub async fn run_add(
    config: &Config,
    texts: Vec<String>,
    files: Vec<PathBuf>,
    keys: Vec<String>,
    meta: Vec<String>,
) -> Result<()> {
    let mut contents = texts;
    for path in &files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        contents.push(text);
    }
    if contents.is_empty() {
        bail!("Nothing to add. Pass text arguments or --file.");
    }

    let harness = Harness::open(config).await?;
    let vs = harness.vector_store();
    let metadata = parse_metadata(vs.schema(), &meta)?;

    let docs: Vec<Document> = contents
        .into_iter()
        .map(|content| Document {
            content,
            metadata: metadata.clone(),
            ..Default::default()
        })
        .collect();

    let options = if keys.is_empty() {
        AddOptions::default()
    } else {
        AddOptions::with_keys(keys)
    };

    let ids = vs.add_documents(&docs, &options).await?;

    println!("add {}", config.index.name);
    println!("  documents: {}", ids.len());
    for id in &ids {
        println!("  id: {}", id);
    }
    println!("ok");

    harness.close().await;
    Ok(())
}

/// Parse `key=value` pairs, typing each value by the field's declared kind.
pub fn parse_metadata(schema: &IndexSchema, pairs: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let (field, raw) = split_pair(pair, '=')?;
        let value = parse_value(schema, field, raw)?;
        metadata.insert(field.to_string(), value);
    }
    Ok(metadata)
}

/// Type `raw` as the declared kind of `field`.
pub fn parse_value(schema: &IndexSchema, field: &str, raw: &str) -> Result<MetadataValue> {
    let kind = match schema.field_kind(field) {
        Some(kind) => kind,
        None => bail!(
            "Field '{}' is not declared in [index.metadata_fields]",
            field
        ),
    };
    let value = match kind {
        FieldKind::Tag => MetadataValue::Text(raw.to_string()),
        FieldKind::Numeric => {
            let n = raw
                .parse::<f64>()
                .with_context(|| format!("Field '{}' expects a number, got '{}'", field, raw))?;
            if !n.is_finite() {
                bail!("Field '{}' expects a finite number, got '{}'", field, raw);
            }
            MetadataValue::Number(n)
        }
        FieldKind::Bool => MetadataValue::Bool(
            raw.parse::<bool>()
                .with_context(|| format!("Field '{}' expects true or false, got '{}'", field, raw))?,
        ),
    };
    Ok(value)
}

pub(crate) fn split_pair(pair: &str, sep: char) -> Result<(&str, &str)> {
    match pair.split_once(sep) {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim(), v.trim())),
        _ => bail!("Expected field{}value, got '{}'", sep, pair),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_harness_core::models::DistanceMetric;

    fn schema() -> IndexSchema {
        IndexSchema::new("docs", "doc:", 4, DistanceMetric::Cosine)
            .with_field("foo", FieldKind::Tag)
            .with_field("year", FieldKind::Numeric)
            .with_field("draft", FieldKind::Bool)
    }

    #[test]
    fn test_parse_metadata_by_kind() {
        let pairs = vec![
            "foo=bar".to_string(),
            "year=1999".to_string(),
            "draft=false".to_string(),
        ];
        let meta = parse_metadata(&schema(), &pairs).unwrap();
        assert_eq!(meta["foo"], MetadataValue::Text("bar".into()));
        assert_eq!(meta["year"], MetadataValue::Number(1999.0));
        assert_eq!(meta["draft"], MetadataValue::Bool(false));
    }

    #[test]
    fn test_parse_metadata_errors() {
        assert!(parse_metadata(&schema(), &["nope=1".to_string()]).is_err());
        assert!(parse_metadata(&schema(), &["year=abc".to_string()]).is_err());
        assert!(parse_metadata(&schema(), &["draft=maybe".to_string()]).is_err());
        assert!(parse_metadata(&schema(), &["missing-separator".to_string()]).is_err());
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        for raw in ["nan", "NaN", "inf", "-infinity"] {
            assert!(parse_value(&schema(), "year", raw).is_err(), "{} accepted", raw);
        }
        assert_eq!(
            parse_value(&schema(), "year", "-2.5").unwrap(),
            MetadataValue::Number(-2.5)
        );
    }

    #[test]
    fn test_tag_value_keeps_equals() {
        let meta = parse_metadata(&schema(), &["foo=a=b".to_string()]).unwrap();
        assert_eq!(meta["foo"], MetadataValue::Text("a=b".into()));
    }
}
