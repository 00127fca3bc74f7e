//! Metadata filter compilation.
//!
//! Callers describe which documents a search may return with a [`Filter`]:
//! either a bare list of accepted values for the index's implicit default
//! field, or a structured [`Predicate`] over named metadata fields. The
//! [`FilterQueryBuilder`] checks the filter against the index schema and
//! compiles it into the store-native [`StoreFilter`].

use crate::error::{HarnessError, Result};
use crate::models::{FieldKind, IndexSchema, MetadataValue};
use crate::store::StoreFilter;

/// A caller-supplied search filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Accepted values for the implicit default field.
    Values(Vec<String>),
    Predicate(Predicate),
}

impl Filter {
    pub fn values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Values(values.into_iter().map(Into::into).collect())
    }
}

impl From<Predicate> for Filter {
    fn from(p: Predicate) -> Self {
        Filter::Predicate(p)
    }
}

/// Structured predicate over declared metadata fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq {
        field: String,
        value: MetadataValue,
    },
    In {
        field: String,
        values: Vec<MetadataValue>,
    },
    /// Inclusive numeric range; at least one bound must be set.
    Range {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn one_of<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<MetadataValue>,
    {
        Predicate::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Predicate::Range {
            field: field.into(),
            min,
            max,
        }
    }
}

/// Compiles caller filters for one index schema.
pub struct FilterQueryBuilder<'a> {
    schema: &'a IndexSchema,
    default_field: Option<&'a str>,
}

impl<'a> FilterQueryBuilder<'a> {
    pub fn new(schema: &'a IndexSchema) -> Self {
        Self {
            schema,
            default_field: None,
        }
    }

    /// Field that [`Filter::Values`] matches against. Without one, values
    /// match against every declared tag field.
    pub fn with_default_field(mut self, field: Option<&'a str>) -> Self {
        self.default_field = field;
        self
    }

    /// Compile `filter`; `None` and empty filters match everything.
    pub fn build(&self, filter: Option<&Filter>) -> Result<StoreFilter> {
        match filter {
            None => Ok(StoreFilter::All),
            Some(Filter::Values(values)) => self.build_values(values),
            Some(Filter::Predicate(p)) => self.build_predicate(p),
        }
    }

    fn build_values(&self, values: &[String]) -> Result<StoreFilter> {
        if values.is_empty() {
            return Ok(StoreFilter::All);
        }

        let fields: Vec<&str> = match self.default_field {
            Some(field) => {
                self.expect_kind(field, FieldKind::Tag)?;
                vec![field]
            }
            None => self
                .schema
                .metadata_fields
                .iter()
                .filter(|(_, kind)| **kind == FieldKind::Tag)
                .map(|(name, _)| name.as_str())
                .collect(),
        };

        if fields.is_empty() {
            return Err(HarnessError::InvalidFilter(format!(
                "index '{}' declares no tag field to match values against",
                self.schema.name
            )));
        }

        let mut parts: Vec<StoreFilter> = fields
            .into_iter()
            .map(|field| StoreFilter::Tag {
                field: field.to_string(),
                values: values.to_vec(),
            })
            .collect();

        if parts.len() == 1 {
            Ok(parts.remove(0))
        } else {
            Ok(StoreFilter::Or(parts))
        }
    }

    fn build_predicate(&self, predicate: &Predicate) -> Result<StoreFilter> {
        match predicate {
            Predicate::Eq { field, value } => self.build_in(field, std::slice::from_ref(value)),
            Predicate::In { field, values } => {
                if values.is_empty() {
                    return Err(HarnessError::InvalidFilter(format!(
                        "empty value set for field '{}'",
                        field
                    )));
                }
                self.build_in(field, values)
            }
            Predicate::Range { field, min, max } => {
                self.expect_kind(field, FieldKind::Numeric)?;
                match (min, max) {
                    (None, None) => Err(HarnessError::InvalidFilter(format!(
                        "range on '{}' has no bounds",
                        field
                    ))),
                    _ if min.iter().chain(max.iter()).any(|b| !b.is_finite()) => {
                        Err(HarnessError::InvalidFilter(format!(
                            "range on '{}' has a non-finite bound",
                            field
                        )))
                    }
                    (Some(lo), Some(hi)) if lo > hi => Err(HarnessError::InvalidFilter(format!(
                        "range on '{}' has min {} > max {}",
                        field, lo, hi
                    ))),
                    _ => Ok(StoreFilter::Numeric {
                        field: field.clone(),
                        min: *min,
                        max: *max,
                    }),
                }
            }
            Predicate::And(parts) => {
                if parts.is_empty() {
                    return Ok(StoreFilter::All);
                }
                Ok(StoreFilter::And(
                    parts
                        .iter()
                        .map(|p| self.build_predicate(p))
                        .collect::<Result<_>>()?,
                ))
            }
            Predicate::Or(parts) => {
                if parts.is_empty() {
                    return Err(HarnessError::InvalidFilter(
                        "empty OR matches nothing".to_string(),
                    ));
                }
                Ok(StoreFilter::Or(
                    parts
                        .iter()
                        .map(|p| self.build_predicate(p))
                        .collect::<Result<_>>()?,
                ))
            }
            Predicate::Not(inner) => Ok(StoreFilter::Not(Box::new(self.build_predicate(inner)?))),
        }
    }

    fn build_in(&self, field: &str, values: &[MetadataValue]) -> Result<StoreFilter> {
        let kind = self.field_kind(field)?;
        for value in values {
            if value.kind() != kind {
                return Err(HarnessError::InvalidFilter(format!(
                    "field '{}' is {} but the filter compares a {} value",
                    field,
                    kind,
                    value.kind()
                )));
            }
            if let MetadataValue::Number(n) = value {
                if !n.is_finite() {
                    return Err(HarnessError::InvalidFilter(format!(
                        "field '{}' cannot be compared with {}",
                        field, n
                    )));
                }
            }
        }

        match kind {
            FieldKind::Tag | FieldKind::Bool => Ok(StoreFilter::Tag {
                field: field.to_string(),
                values: values.iter().map(MetadataValue::to_field_string).collect(),
            }),
            FieldKind::Numeric => {
                let mut points: Vec<StoreFilter> = values
                    .iter()
                    .filter_map(|v| match v {
                        MetadataValue::Number(n) => Some(StoreFilter::Numeric {
                            field: field.to_string(),
                            min: Some(*n),
                            max: Some(*n),
                        }),
                        _ => None,
                    })
                    .collect();
                if points.len() == 1 {
                    Ok(points.remove(0))
                } else {
                    Ok(StoreFilter::Or(points))
                }
            }
        }
    }

    fn field_kind(&self, field: &str) -> Result<FieldKind> {
        self.schema.field_kind(field).ok_or_else(|| {
            HarnessError::InvalidFilter(format!(
                "field '{}' is not declared in index '{}'",
                field, self.schema.name
            ))
        })
    }

    fn expect_kind(&self, field: &str, expected: FieldKind) -> Result<()> {
        let kind = self.field_kind(field)?;
        if kind != expected {
            return Err(HarnessError::InvalidFilter(format!(
                "field '{}' is {}, expected {}",
                field, kind, expected
            )));
        }
        Ok(())
    }
}
