//! Source table access
//!
//! This module defines how records and schema metadata are read:
//! - The [`SourceReader`] trait
//! - Table and view schema types
//! - View field resolution
//!
//! [`AirtableReader`] talks to the Airtable REST API; [`StaticSource`] serves
//! preloaded records and schema from memory.

mod airtable;
mod rate_limit;

pub use airtable::*;
pub use rate_limit::*;

use crate::error::{Error, Result};
use crate::record::RawRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Schema of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Schema of one view
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewSchema {
    pub id: String,
    pub name: String,
    /// Field ids (or names) in display order
    #[serde(rename = "visibleFieldOrder", default, skip_serializing_if = "Option::is_none")]
    pub visible_field_order: Option<Vec<String>>,
    /// Field ids (or names) hidden in the view
    #[serde(rename = "hiddenFields", default, skip_serializing_if = "Option::is_none")]
    pub hidden_fields: Option<Vec<String>>,
}

impl ViewSchema {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_visible_fields(mut self, fields: &[&str]) -> Self {
        self.visible_field_order = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn with_hidden_fields(mut self, fields: &[&str]) -> Self {
        self.hidden_fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }
}

/// Schema of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub views: Vec<ViewSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: format!("tbl{}", name),
            name,
            fields: Vec::new(),
            views: Vec::new(),
        }
    }

    /// Add a field whose id is `fld` followed by its name
    pub fn with_field(mut self, name: &str, field_type: &str) -> Self {
        self.fields.push(FieldSchema {
            id: format!("fld{}", name),
            name: name.to_string(),
            field_type: field_type.to_string(),
        });
        self
    }

    pub fn with_view(mut self, view: ViewSchema) -> Self {
        self.views.push(view);
        self
    }

    /// `field name -> source type tag`
    pub fn field_types(&self) -> HashMap<String, String> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.field_type.clone()))
            .collect()
    }

    /// Find a view by name or id
    pub fn view(&self, name_or_id: &str) -> Option<&ViewSchema> {
        self.views
            .iter()
            .find(|v| v.name == name_or_id)
            .or_else(|| self.views.iter().find(|v| v.id == name_or_id))
    }
}

/// Fields visible through one view of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMetadata {
    /// `None` when no view was requested and the whole table is used
    pub id: Option<String>,
    pub name: Option<String>,
    pub fields: Vec<String>,
}

/// Names of the fields visible in `view`, in display order
///
/// A field is visible when it appears in the view's visible order (if the
/// view has one) and is not hidden. Without a visible order every table field
/// counts, minus hidden ones. Entries may be field ids or field names; entries
/// naming no known field are ignored. `None` means the whole table.
pub fn resolve_visible_fields(table: &TableSchema, view: Option<&ViewSchema>) -> Vec<String> {
    let Some(view) = view else {
        return table.fields.iter().map(|f| f.name.clone()).collect();
    };

    let by_id: HashMap<&str, &str> = table
        .fields
        .iter()
        .map(|f| (f.id.as_str(), f.name.as_str()))
        .collect();
    let known_names: HashSet<&str> = table.fields.iter().map(|f| f.name.as_str()).collect();
    let to_name = |entry: &str| -> Option<String> {
        by_id
            .get(entry)
            .copied()
            .or_else(|| known_names.get(entry).copied())
            .map(str::to_string)
    };

    let visible: Vec<String> = match &view.visible_field_order {
        Some(order) => order.iter().filter_map(|entry| to_name(entry.as_str())).collect(),
        None => table.fields.iter().map(|f| f.name.clone()).collect(),
    };

    let hidden: HashSet<String> = view
        .hidden_fields
        .iter()
        .flatten()
        .filter_map(|entry| to_name(entry.as_str()))
        .collect();

    visible
        .into_iter()
        .filter(|name| !hidden.contains(name))
        .collect()
}

/// Resolve the view metadata of `table`; a named view must exist
pub fn view_metadata(table: &TableSchema, view: Option<&str>) -> Result<ViewMetadata> {
    match view {
        Some(view_name) => {
            let schema = table.view(view_name).ok_or_else(|| {
                Error::NotFound(format!(
                    "View '{}' not found in the table '{}'",
                    view_name, table.name
                ))
            })?;
            let fields = resolve_visible_fields(table, Some(schema));
            debug!("Fields visible in view '{}': {:?}", schema.name, fields);
            Ok(ViewMetadata {
                id: Some(schema.id.clone()),
                name: Some(schema.name.clone()),
                fields,
            })
        }
        None => Ok(ViewMetadata {
            id: None,
            name: None,
            fields: resolve_visible_fields(table, None),
        }),
    }
}

/// Find a table by name in a base's schema
pub fn find_table<'a>(tables: &'a [TableSchema], name: &str) -> Result<&'a TableSchema> {
    tables
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::NotFound(format!("Table '{}' not found in the base", name)))
}

/// Reader for one source table
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// All records of the table, optionally through a view and restricted to fields
    async fn fetch_records(
        &self,
        view: Option<&str>,
        fields: Option<&[String]>,
    ) -> Result<Vec<RawRecord>>;

    /// `field name -> source type tag` for the table
    async fn fetch_field_types(&self) -> Result<HashMap<String, String>>;

    /// Visible fields of a view of `table`; the whole table when `view` is `None`
    async fn fetch_view_metadata(&self, table: &str, view: Option<&str>) -> Result<ViewMetadata>;
}

/// Source serving preloaded records and schema
///
/// Views restrict fields but never filter rows.
#[derive(Debug, Clone)]
pub struct StaticSource {
    tables: Vec<TableSchema>,
    table_name: String,
    records: Vec<RawRecord>,
}

impl StaticSource {
    pub fn new(table: TableSchema, records: Vec<RawRecord>) -> Self {
        Self {
            table_name: table.name.clone(),
            tables: vec![table],
            records,
        }
    }
}

#[async_trait]
impl SourceReader for StaticSource {
    async fn fetch_records(
        &self,
        view: Option<&str>,
        fields: Option<&[String]>,
    ) -> Result<Vec<RawRecord>> {
        if let Some(view_name) = view {
            let table = find_table(&self.tables, &self.table_name)?;
            view_metadata(table, Some(view_name))?;
        }

        let records = match fields {
            None => self.records.clone(),
            Some(fields) => self
                .records
                .iter()
                .map(|record| {
                    let mut record = record.clone();
                    record.fields.retain(|name, _| fields.contains(name));
                    record
                })
                .collect(),
        };
        Ok(records)
    }

    async fn fetch_field_types(&self) -> Result<HashMap<String, String>> {
        Ok(find_table(&self.tables, &self.table_name)?.field_types())
    }

    async fn fetch_view_metadata(&self, table: &str, view: Option<&str>) -> Result<ViewMetadata> {
        view_metadata(find_table(&self.tables, table)?, view)
    }
}
