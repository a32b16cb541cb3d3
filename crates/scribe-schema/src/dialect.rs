//! Schema dialect: parsing, canonicalization, compatibility
//!
//! The registry core is format-agnostic; everything format-specific sits
//! behind [`SchemaDialect`]. The shipped dialect is Avro: canonicalization is
//! Avro's Parsing Canonical Form, and compatibility is decided by structural
//! writer/reader schema resolution.

use crate::error::{RegistryError, RegistryResult};
use crate::types::CompatibilityLevel;
use apache_avro::Schema as AvroSchema;

/// Format capability injected into the registry
pub trait SchemaDialect: Send + Sync {
    /// Parse a schema string and return its canonical form, or `None` if the
    /// string is not a valid schema. Equal schemas have equal canonical
    /// forms.
    fn canonicalize(&self, raw: &str) -> Option<String>;

    /// Decide whether `new_schema` may succeed `latest_schema` under the
    /// given compatibility level. Both strings are canonical forms.
    fn is_compatible(
        &self,
        level: CompatibilityLevel,
        new_schema: &str,
        latest_schema: &str,
    ) -> RegistryResult<bool>;
}

/// Avro dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct AvroDialect;

impl SchemaDialect for AvroDialect {
    fn canonicalize(&self, raw: &str) -> Option<String> {
        AvroSchema::parse_str(raw).ok().map(|s| s.canonical_form())
    }

    fn is_compatible(
        &self,
        level: CompatibilityLevel,
        new_schema: &str,
        latest_schema: &str,
    ) -> RegistryResult<bool> {
        if level == CompatibilityLevel::None {
            return Ok(true);
        }

        let new = AvroSchema::parse_str(new_schema)
            .map_err(|e| RegistryError::InvalidSchema(format!("new schema: {}", e)))?;
        let latest = AvroSchema::parse_str(latest_schema)
            .map_err(|e| RegistryError::InvalidSchema(format!("existing schema: {}", e)))?;

        // BACKWARD: the new schema (reader) can read data written with the
        // latest schema (writer). FORWARD is the reverse orientation.
        let compatible = match level {
            CompatibilityLevel::None => true,
            CompatibilityLevel::Backward => resolves(&latest, &new).is_ok(),
            CompatibilityLevel::Forward => resolves(&new, &latest).is_ok(),
            CompatibilityLevel::Full => {
                resolves(&latest, &new).is_ok() && resolves(&new, &latest).is_ok()
            }
        };

        Ok(compatible)
    }
}

/// Avro schema resolution: can `reader` read data written with `writer`?
fn resolves(writer: &AvroSchema, reader: &AvroSchema) -> Result<(), String> {
    use apache_avro::Schema;

    match (writer, reader) {
        (Schema::Null, Schema::Null)
        | (Schema::Boolean, Schema::Boolean)
        | (Schema::String, Schema::String)
        | (Schema::Bytes, Schema::Bytes) => Ok(()),

        // Numeric promotions: int -> long -> float -> double
        (Schema::Int, Schema::Int)
        | (Schema::Int, Schema::Long)
        | (Schema::Int, Schema::Float)
        | (Schema::Int, Schema::Double)
        | (Schema::Long, Schema::Long)
        | (Schema::Long, Schema::Float)
        | (Schema::Long, Schema::Double)
        | (Schema::Float, Schema::Float)
        | (Schema::Float, Schema::Double)
        | (Schema::Double, Schema::Double) => Ok(()),

        // string <-> bytes promotion
        (Schema::String, Schema::Bytes) | (Schema::Bytes, Schema::String) => Ok(()),

        (Schema::Array(w), Schema::Array(r)) => resolves(&w.items, &r.items),

        (Schema::Map(w), Schema::Map(r)) => resolves(&w.types, &r.types),

        // Every writer symbol must be known to the reader
        (Schema::Enum(w), Schema::Enum(r)) => {
            for symbol in &w.symbols {
                if !r.symbols.contains(symbol) {
                    return Err(format!("enum symbol '{}' unknown to reader", symbol));
                }
            }
            Ok(())
        }

        (Schema::Fixed(w), Schema::Fixed(r)) => {
            if w.size != r.size {
                return Err(format!(
                    "fixed size mismatch: writer {}, reader {}",
                    w.size, r.size
                ));
            }
            Ok(())
        }

        (Schema::Record(w), Schema::Record(r)) => {
            // Writer fields the reader also has must resolve; extra writer
            // fields are skipped by the reader.
            for w_field in &w.fields {
                let matched = r.fields.iter().find(|rf| {
                    rf.name == w_field.name
                        || rf
                            .aliases
                            .as_ref()
                            .is_some_and(|aliases| aliases.contains(&w_field.name))
                });
                if let Some(r_field) = matched {
                    resolves(&w_field.schema, &r_field.schema)
                        .map_err(|e| format!("field '{}': {}", w_field.name, e))?;
                }
            }

            // Reader fields absent from the writer need a default.
            for r_field in &r.fields {
                let written = w.fields.iter().any(|wf| {
                    wf.name == r_field.name
                        || r_field
                            .aliases
                            .as_ref()
                            .is_some_and(|aliases| aliases.contains(&wf.name))
                });
                if !written && r_field.default.is_none() {
                    return Err(format!(
                        "reader field '{}' has no writer counterpart and no default",
                        r_field.name
                    ));
                }
            }

            Ok(())
        }

        // Every writer variant must resolve against some reader variant
        (Schema::Union(w), Schema::Union(r)) => {
            for w_variant in w.variants() {
                let ok = r
                    .variants()
                    .iter()
                    .any(|rv| resolves(w_variant, rv).is_ok());
                if !ok {
                    return Err("writer union variant unreadable by reader union".to_string());
                }
            }
            Ok(())
        }

        (w, Schema::Union(r)) => {
            if r.variants().iter().any(|rv| resolves(w, rv).is_ok()) {
                Ok(())
            } else {
                Err("writer schema does not match any reader union variant".to_string())
            }
        }

        (Schema::Union(w), r) => {
            for w_variant in w.variants() {
                resolves(w_variant, r)?;
            }
            Ok(())
        }

        // Remaining cases (logical types, references) resolve when the
        // variant kind matches.
        (w, r) if std::mem::discriminant(w) == std::mem::discriminant(r) => Ok(()),

        (w, r) => Err(format!("writer {:?} is not readable as {:?}", w, r)),
    }
}
