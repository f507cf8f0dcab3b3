//! Row filters - declarative row-access rules for moderators
//!
//! A moderator's access to a directory is a [`RowScope`]: either every row,
//! or a list of [`Control`]s. A row is reachable when ANY control matches it.
//!
//! Evaluation is total: missing columns read as empty strings and
//! non-numeric cells simply fail numeric filters. Only malformed filter
//! definitions are errors, and those are caught by [`validate_filters`]
//! when a moderator is appointed.
//!
//! ## Stored form
//!
//! ```json
//! {"type":"controls","controls":[
//!   {"column":{"type":"single","value":"Score"},
//!    "filter":{"type":"numeric_range","id":"score","range":{"type":"above","threshold":40}}}
//! ]}
//! ```

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;

/// Column name -> cell value for one row.
///
/// Ordered by column name so that range selectors can walk a lexical span.
pub type RowValues = BTreeMap<String, String>;

/// Build the column-name -> value map for a row using the directory schema.
///
/// Cells past the end of a short row read as empty strings. When a schema
/// repeats a column name, the rightmost cell wins.
pub fn materialize_row(columns: &[String], values: &[String]) -> RowValues {
    columns
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), values.get(i).cloned().unwrap_or_default()))
        .collect()
}

// =============================================================================
// Column selectors
// =============================================================================

/// Selects one column, or every column whose name falls in an inclusive
/// lexical range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnId {
    Single { value: String },
    /// Compared as strings, not by schema position: "ColumnA".."ColumnJ"
    /// also selects "ColumnB" through "ColumnI" and "ColumnA1".
    Range { start: String, end: String },
}

impl ColumnId {
    pub fn single(value: impl Into<String>) -> Self {
        ColumnId::Single { value: value.into() }
    }

    pub fn range(start: impl Into<String>, end: impl Into<String>) -> Self {
        ColumnId::Range {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Structural check, independent of any schema
    pub fn validate(&self) -> Result<(), DirectoryError> {
        match self {
            ColumnId::Single { value } => {
                if value.trim().is_empty() {
                    return Err(DirectoryError::Validation(
                        "single column id requires a column name".into(),
                    ));
                }
            }
            ColumnId::Range { start, end } => {
                if start.trim().is_empty() || end.trim().is_empty() {
                    return Err(DirectoryError::Validation(
                        "column range requires start and end names".into(),
                    ));
                }
                if start == end {
                    return Err(DirectoryError::Validation(format!(
                        "column range start and end must differ (both '{}')",
                        start
                    )));
                }
                if start > end {
                    return Err(DirectoryError::Validation(format!(
                        "column range '{}'..'{}' is reversed",
                        start, end
                    )));
                }
            }
        }
        Ok(())
    }

    /// Column names this selector refers to directly
    fn named_columns(&self) -> Vec<&str> {
        match self {
            ColumnId::Single { value } => vec![value.as_str()],
            ColumnId::Range { start, end } => vec![start.as_str(), end.as_str()],
        }
    }

    /// Resolve the selector to the row's cell values
    pub fn resolve<'a>(&self, row: &'a RowValues) -> Vec<&'a str> {
        match self {
            ColumnId::Single { value } => {
                vec![row.get(value).map(String::as_str).unwrap_or("")]
            }
            ColumnId::Range { start, end } => {
                if start > end {
                    return Vec::new();
                }
                row.range::<str, _>((Bound::Included(start.as_str()), Bound::Included(end.as_str())))
                    .map(|(_, v)| v.as_str())
                    .collect()
            }
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Numeric comparison applied to cells that parse as numbers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RangeFilter {
    /// x > threshold
    Above { threshold: f64 },
    /// x < threshold
    Below { threshold: f64 },
    /// min <= x <= max
    Between { min: f64, max: f64 },
}

impl RangeFilter {
    pub fn validate(&self) -> Result<(), DirectoryError> {
        match *self {
            RangeFilter::Above { threshold } | RangeFilter::Below { threshold } => {
                if !threshold.is_finite() {
                    return Err(DirectoryError::Validation(
                        "range threshold must be a finite number".into(),
                    ));
                }
            }
            RangeFilter::Between { min, max } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(DirectoryError::Validation(
                        "range bounds must be finite numbers".into(),
                    ));
                }
                if min >= max {
                    return Err(DirectoryError::Validation(format!(
                        "range minimum {} must be below maximum {}",
                        min, max
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, x: f64) -> bool {
        match *self {
            RangeFilter::Above { threshold } => x > threshold,
            RangeFilter::Below { threshold } => x < threshold,
            RangeFilter::Between { min, max } => min <= x && x <= max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    NumericRange {
        /// Form identifier of the range; not used for matching
        #[serde(default)]
        id: String,
        range: RangeFilter,
    },
    Locations { values: Vec<String> },
    Categories { values: Vec<String> },
    /// Cells hold comma-joined tag lists
    Tags { values: Vec<String> },
}

impl Filter {
    pub fn validate(&self) -> Result<(), DirectoryError> {
        match self {
            Filter::NumericRange { range, .. } => range.validate(),
            Filter::Locations { values } | Filter::Categories { values } | Filter::Tags { values } => {
                if values.iter().all(|v| v.trim().is_empty()) {
                    return Err(DirectoryError::Validation(format!(
                        "{} filter requires at least one value",
                        self.kind()
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Filter::NumericRange { .. } => "numeric_range",
            Filter::Locations { .. } => "locations",
            Filter::Categories { .. } => "categories",
            Filter::Tags { .. } => "tags",
        }
    }

    /// True when any of the resolved cell values satisfies the filter
    pub fn matches_any(&self, cells: &[&str]) -> bool {
        match self {
            Filter::NumericRange { range, .. } => cells
                .iter()
                .filter_map(|cell| cell.trim().parse::<f64>().ok())
                .filter(|x| x.is_finite())
                .any(|x| range.contains(x)),
            Filter::Locations { values } | Filter::Categories { values } => {
                let wanted = normalized(values);
                cells.iter().any(|cell| wanted.contains(&normalize(cell)))
            }
            Filter::Tags { values } => {
                let wanted = normalized(values);
                cells
                    .iter()
                    .flat_map(|cell| cell.split(','))
                    .any(|tag| wanted.contains(&normalize(tag)))
            }
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn normalized(values: &[String]) -> Vec<String> {
    values.iter().map(|v| normalize(v)).collect()
}

// =============================================================================
// Controls
// =============================================================================

/// One row-access rule: a column selector paired with a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub column: ColumnId,
    pub filter: Filter,
}

impl Control {
    pub fn new(column: ColumnId, filter: Filter) -> Self {
        Self { column, filter }
    }

    pub fn matches(&self, row: &RowValues) -> bool {
        let cells = self.column.resolve(row);
        self.filter.matches_any(&cells)
    }
}

/// OR across controls. An empty list matches nothing.
pub fn matches(controls: &[Control], row: &RowValues) -> bool {
    controls.iter().any(|control| control.matches(row))
}

/// Check every control against its own invariants and the directory's
/// current column schema.
pub fn validate_filters(controls: &[Control], columns: &[String]) -> Result<(), DirectoryError> {
    for (i, control) in controls.iter().enumerate() {
        control
            .column
            .validate()
            .map_err(|e| prefix_control_error(i, e))?;

        for name in control.column.named_columns() {
            if !columns.iter().any(|c| c == name) {
                return Err(DirectoryError::Validation(format!(
                    "control {}: column '{}' does not exist",
                    i, name
                )));
            }
        }

        control
            .filter
            .validate()
            .map_err(|e| prefix_control_error(i, e))?;
    }
    Ok(())
}

fn prefix_control_error(index: usize, err: DirectoryError) -> DirectoryError {
    match err {
        DirectoryError::Validation(msg) => {
            DirectoryError::Validation(format!("control {}: {}", index, msg))
        }
        other => other,
    }
}

// =============================================================================
// Row scope
// =============================================================================

/// Stored row-access specification of a moderator domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowScope {
    /// Every row in the directory
    All,
    /// Rows matching at least one control; no controls means no rows
    Controls { controls: Vec<Control> },
}

impl RowScope {
    pub fn controls(controls: Vec<Control>) -> Self {
        RowScope::Controls { controls }
    }

    pub fn none() -> Self {
        RowScope::Controls {
            controls: Vec::new(),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, RowScope::All)
    }

    /// Whether the scope can match any row at all
    pub fn is_empty(&self) -> bool {
        matches!(self, RowScope::Controls { controls } if controls.is_empty())
    }

    pub fn allows(&self, row: &RowValues) -> bool {
        match self {
            RowScope::All => true,
            RowScope::Controls { controls } => matches(controls, row),
        }
    }

    pub fn validate(&self, columns: &[String]) -> Result<(), DirectoryError> {
        match self {
            RowScope::All => Ok(()),
            RowScope::Controls { controls } => validate_filters(controls, columns),
        }
    }

    pub fn to_json(&self) -> Result<String, DirectoryError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the stored form. A blank column is a scope with no controls.
    pub fn from_json(json: &str) -> Result<Self, DirectoryError> {
        if json.trim().is_empty() {
            return Ok(RowScope::none());
        }
        Ok(serde_json::from_str(json)?)
    }
}
