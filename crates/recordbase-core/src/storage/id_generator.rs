//! Resource-scoped sequential identifiers.

use sled::{Db, Tree};
use tracing::debug;

use crate::catalog::{resource_initials, ResourceDef};
use crate::error::{Error, Result};

/// Tree name for identifier counters.
const COUNTER_TREE: &str = "counters";

/// One piece of a parsed identifier template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Year,
    Incremental,
    ResourceInitial,
    ResourceName,
}

/// A parsed `idShape` template such as `{year}-{resourceInitial}{incremental}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTemplate {
    segments: Vec<Segment>,
}

impl IdTemplate {
    /// Parse a template. Unknown placeholders, unclosed braces and templates
    /// without `{incremental}` are rejected.
    pub fn parse(shape: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = shape;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                Error::Validation(format!("id shape '{}' has an unclosed placeholder", shape))
            })?;
            let segment = match &after[..close] {
                "year" => Segment::Year,
                "incremental" => Segment::Incremental,
                "resourceInitial" => Segment::ResourceInitial,
                "resourceName" => Segment::ResourceName,
                other => {
                    return Err(Error::Validation(format!(
                        "id shape '{}' uses unknown placeholder '{{{}}}'",
                        shape, other
                    )))
                }
            };
            segments.push(segment);
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        if !segments.contains(&Segment::Incremental) {
            return Err(Error::Validation(format!(
                "id shape '{}' must contain {{incremental}}",
                shape
            )));
        }
        Ok(Self { segments })
    }

    /// Whether counters are kept per year.
    pub fn uses_year(&self) -> bool {
        self.segments.contains(&Segment::Year)
    }

    /// Render an identifier.
    pub fn render(&self, counter: u64, padding: usize, year: i32, resource_name: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Year => out.push_str(&year.to_string()),
                Segment::Incremental => {
                    out.push_str(&format!("{:0width$}", counter, width = padding))
                }
                Segment::ResourceInitial => out.push_str(&resource_initials(resource_name)),
                Segment::ResourceName => out.push_str(resource_name),
            }
        }
        out
    }
}

/// Persistent per-resource counters.
///
/// Each increment is a single atomic operation on the store, so concurrent
/// creators (in this process or another one sharing the database) never
/// observe the same value.
pub struct IdGenerator {
    counters: Tree,
}

impl IdGenerator {
    pub fn open(db: &Db) -> Result<Self> {
        Ok(Self {
            counters: db.open_tree(COUNTER_TREE)?,
        })
    }

    /// Increment the resource's counter and render the next identifier.
    pub fn next(&self, resource: &ResourceDef, year: i32) -> Result<String> {
        let template = IdTemplate::parse(&resource.id_shape.shape)?;
        let key = counter_key(&resource.id, template.uses_year().then_some(year));

        let updated = self.counters.update_and_fetch(&key, |old| {
            let current = old.and_then(decode_counter).unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;
        let counter = updated
            .as_deref()
            .and_then(decode_counter)
            .ok_or_else(|| Error::Corrupt(format!("counter for resource '{}'", resource.id)))?;

        debug!(resource = %resource.id, counter, "allocated identifier counter");
        Ok(template.render(counter, resource.id_shape.padding, year, &resource.name))
    }

    /// Last value handed out for a resource (and year), zero if none.
    pub fn current(&self, resource_id: &str, year: Option<i32>) -> Result<u64> {
        let value = self.counters.get(counter_key(resource_id, year))?;
        Ok(value.as_deref().and_then(decode_counter).unwrap_or(0))
    }

    /// Drop every counter of a resource.
    pub fn reset(&self, resource_id: &str) -> Result<()> {
        let mut prefix = resource_id.as_bytes().to_vec();
        prefix.push(0);
        for key in self.counters.scan_prefix(&prefix).keys() {
            self.counters.remove(key?)?;
        }
        Ok(())
    }
}

fn counter_key(resource_id: &str, year: Option<i32>) -> Vec<u8> {
    let mut key = Vec::with_capacity(resource_id.len() + 5);
    key.extend_from_slice(resource_id.as_bytes());
    key.push(0);
    if let Some(year) = year {
        key.extend_from_slice(&year.to_be_bytes());
    }
    key
}

fn decode_counter(bytes: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
