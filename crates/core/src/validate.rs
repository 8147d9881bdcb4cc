//! Query configuration validation against the schema registry.
//!
//! Checks run in a fixed order, cheapest first, and stop at the first
//! failure. Nothing here performs I/O.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::{ValidationError, ValidationErrorKind as Kind};
use crate::limits::{MAX_FILTERS, MAX_GROUP_BY, MAX_SELECTS};
use crate::query::{
    Aggregate, CustomQueryConfig, CustomQueryFilter, CustomQuerySelect, FilterValue,
    OperatorFamily, Scalar,
};
use crate::schema::{ColumnType, SchemaRegistry, TableDefinition};

/// Validates query configs against a schema registry.
#[derive(Debug, Clone, Copy)]
pub struct QueryValidator<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> QueryValidator<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Accept the whole config or return the first failure.
    pub fn validate(&self, config: &CustomQueryConfig) -> Result<(), ValidationError> {
        let table = self.registry.get_table(&config.table).ok_or_else(|| {
            let valid: Vec<&str> = self.registry.table_names().collect();
            ValidationError::new(
                Kind::UnknownTable,
                format!("Invalid table. Valid tables: {}", valid.join(", ")),
            )
            .with_field("table")
        })?;

        if config.selects.is_empty() {
            return Err(ValidationError::new(
                Kind::EmptySelects,
                "At least one SELECT expression is required",
            )
            .with_field("selects"));
        }
        if config.selects.len() > MAX_SELECTS {
            return Err(ValidationError::new(
                Kind::TooManySelects,
                format!("Maximum {} SELECT expressions allowed", MAX_SELECTS),
            )
            .with_field("selects"));
        }
        for select in &config.selects {
            validate_select(select, table)?;
        }

        if config.filters.len() > MAX_FILTERS {
            return Err(ValidationError::new(
                Kind::TooManyFilters,
                format!("Maximum {} filters allowed", MAX_FILTERS),
            )
            .with_field("filters"));
        }
        for filter in &config.filters {
            validate_filter(filter, table)?;
        }

        if config.group_by.len() > MAX_GROUP_BY {
            return Err(ValidationError::new(
                Kind::TooManyGroupBy,
                format!("Maximum {} GROUP BY fields allowed", MAX_GROUP_BY),
            )
            .with_field("groupBy"));
        }
        for field in &config.group_by {
            if table.get_column(field).is_none() {
                return Err(ValidationError::new(
                    Kind::UnknownGroupByColumn,
                    format!("Invalid GROUP BY column for table \"{}\"", table.name),
                )
                .with_field("groupBy"));
            }
        }

        Ok(())
    }
}

fn validate_select(select: &CustomQuerySelect, table: &TableDefinition) -> Result<(), ValidationError> {
    if select.is_wildcard() {
        if select.aggregate == Aggregate::Count {
            return Ok(());
        }
        return Err(ValidationError::new(
            Kind::WildcardRequiresCount,
            format!(
                "Aggregate \"{}\" requires a specific column, not \"*\"",
                select.aggregate
            ),
        )
        .with_field("selects"));
    }

    let column = table.get_column(&select.field).ok_or_else(|| {
        ValidationError::new(
            Kind::UnknownColumn,
            format!("Invalid column for table \"{}\"", table.name),
        )
        .with_field("selects")
    })?;

    if !column.aggregatable && !select.aggregate.counts_rows() {
        return Err(ValidationError::new(
            Kind::AggregateNotAllowed,
            format!(
                "Column \"{}\" cannot be used with aggregate \"{}\"",
                column.name, select.aggregate
            ),
        )
        .with_field("selects"));
    }

    Ok(())
}

fn validate_filter(filter: &CustomQueryFilter, table: &TableDefinition) -> Result<(), ValidationError> {
    let column = table.get_column(&filter.field).ok_or_else(|| {
        ValidationError::new(
            Kind::UnknownFilterColumn,
            format!("Invalid filter column for table \"{}\"", table.name),
        )
        .with_field("filters")
    })?;

    if !column.filterable {
        return Err(ValidationError::new(
            Kind::FilterNotAllowed,
            format!("Column \"{}\" cannot be used in filters", column.name),
        )
        .with_field("filters"));
    }

    let family = filter.operator.family();
    if filter.value.is_list() && family != OperatorFamily::Membership {
        return Err(ValidationError::new(
            Kind::InvalidFilterValue,
            format!("Operator \"{}\" does not accept a list value", filter.operator),
        )
        .with_field("filters"));
    }

    match (family, column.column_type) {
        (OperatorFamily::Equality | OperatorFamily::Ordering, ColumnType::DateTime) => {
            let parseable = match &filter.value {
                FilterValue::Scalar(scalar) => is_datetime_literal(scalar),
                FilterValue::List(_) => false,
            };
            if !parseable {
                return Err(ValidationError::new(
                    Kind::InvalidFilterValue,
                    format!("Operator \"{}\" on \"{}\" requires a date value", filter.operator, column.name),
                )
                .with_field("filters"));
            }
        }
        // Bound as Float64 by the compiler.
        (OperatorFamily::Ordering, _) | (OperatorFamily::Equality, ColumnType::Number) => {
            let numeric = match &filter.value {
                FilterValue::Scalar(scalar) => scalar.as_f64().is_some(),
                FilterValue::List(_) => false,
            };
            if !numeric {
                return Err(ValidationError::new(
                    Kind::InvalidFilterValue,
                    format!("Operator \"{}\" on \"{}\" requires a numeric value", filter.operator, column.name),
                )
                .with_field("filters"));
            }
        }
        _ => {}
    }

    Ok(())
}

/// Dates, datetimes and unix timestamps.
fn is_datetime_literal(scalar: &Scalar) -> bool {
    if scalar.as_f64().is_some() {
        return true;
    }
    let text = scalar.to_string();
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").is_ok()
        || DateTime::parse_from_rfc3339(text).is_ok()
}
