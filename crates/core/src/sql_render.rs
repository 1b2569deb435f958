use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::columns::{primary_key_columns, ColumnInfo};
use crate::identity_resolver::Condition;
use crate::update_planner::UpdateStatement;
use crate::value::{hex_encode, Scalar};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SqlRenderError {
    #[error("schema name cannot be empty")]
    EmptySchemaName,
    #[error("table name cannot be empty")]
    EmptyTableName,
    #[error("column name cannot be empty")]
    EmptyColumnName,
    #[error("update for row {row_index} has no assignments")]
    NoAssignments { row_index: usize },
    #[error("update for row {row_index} has no predicate")]
    NoPredicate { row_index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    #[default]
    MySql,
    Postgres,
    Sqlite,
}

impl SqlDialect {
    #[must_use]
    pub fn quote_identifier(self, identifier: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", identifier.replace('`', "``")),
            Self::Postgres | Self::Sqlite => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }

    fn placeholder(self, position: usize) -> String {
        match self {
            Self::Postgres => format!("${position}"),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }

    fn literal(self, value: &Scalar) -> String {
        match value {
            Scalar::Null => "NULL".to_string(),
            Scalar::Bool(flag) => match self {
                Self::Sqlite => String::from(if *flag { "1" } else { "0" }),
                Self::MySql | Self::Postgres => String::from(if *flag { "TRUE" } else { "FALSE" }),
            },
            Scalar::Integer(number) => number.to_string(),
            Scalar::Float(number) if number.is_finite() => number.to_string(),
            Scalar::Float(number) => self.quote_string(&number.to_string()),
            Scalar::Text(text) => self.quote_string(text),
            Scalar::Binary(bytes) => match self {
                Self::Postgres => format!("'\\x{}'::bytea", hex_encode(bytes)),
                Self::MySql | Self::Sqlite => format!("X'{}'", hex_encode(bytes)),
            },
        }
    }

    /// MySQL treats backslash as an escape inside string literals by default.
    fn quote_string(self, value: &str) -> String {
        let escaped = value.replace('\'', "''");
        match self {
            Self::MySql => format!("'{}'", escaped.replace('\\', "\\\\")),
            Self::Postgres | Self::Sqlite => format!("'{escaped}'"),
        }
    }
}

impl std::str::FromStr for SqlDialect {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unsupported SQL dialect `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    schema: Option<String>,
    table: String,
}

impl TableTarget {
    pub fn new(schema: Option<&str>, table: &str) -> Result<Self, SqlRenderError> {
        if table.trim().is_empty() {
            return Err(SqlRenderError::EmptyTableName);
        }
        if let Some(schema_name) = schema {
            if schema_name.trim().is_empty() {
                return Err(SqlRenderError::EmptySchemaName);
            }
        }
        Ok(Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        })
    }

    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn qualified(&self, dialect: SqlDialect) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                dialect.quote_identifier(schema),
                dialect.quote_identifier(&self.table)
            ),
            None => dialect.quote_identifier(&self.table),
        }
    }
}

/// SQL text with positional parameters, ready for a driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedStatement {
    pub row_index: usize,
    pub sql: String,
    pub params: Vec<Scalar>,
}

fn check_statement(statement: &UpdateStatement) -> Result<(), SqlRenderError> {
    if statement.set_clauses.is_empty() {
        return Err(SqlRenderError::NoAssignments {
            row_index: statement.row_index,
        });
    }
    if statement.where_clauses.is_empty() {
        return Err(SqlRenderError::NoPredicate {
            row_index: statement.row_index,
        });
    }
    let names = statement
        .set_clauses
        .iter()
        .map(|clause| clause.column.as_str())
        .chain(statement.where_clauses.iter().map(|clause| clause.column.as_str()));
    for name in names {
        if name.trim().is_empty() {
            return Err(SqlRenderError::EmptyColumnName);
        }
    }
    Ok(())
}

/// Renders `UPDATE ... SET ... WHERE ...` with bound parameters.
pub fn render_update(
    target: &TableTarget,
    statement: &UpdateStatement,
    dialect: SqlDialect,
) -> Result<RenderedStatement, SqlRenderError> {
    check_statement(statement)?;

    let mut params = Vec::with_capacity(statement.set_clauses.len() + statement.where_clauses.len());
    let mut assignments = Vec::with_capacity(statement.set_clauses.len());
    for clause in &statement.set_clauses {
        params.push(clause.value.clone());
        assignments.push(format!(
            "{} = {}",
            dialect.quote_identifier(&clause.column),
            dialect.placeholder(params.len())
        ));
    }

    let mut conditions = Vec::with_capacity(statement.where_clauses.len());
    for clause in &statement.where_clauses {
        let column = dialect.quote_identifier(&clause.column);
        match &clause.condition {
            Condition::IsNull => conditions.push(format!("{column} IS NULL")),
            Condition::Equals(value) => {
                params.push(value.clone());
                conditions.push(format!("{column} = {}", dialect.placeholder(params.len())));
            }
        }
    }

    Ok(RenderedStatement {
        row_index: statement.row_index,
        sql: format!(
            "UPDATE {} SET {} WHERE {}",
            target.qualified(dialect),
            assignments.join(", "),
            conditions.join(" AND ")
        ),
        params,
    })
}

/// Renders the same statement with literals inlined, for previews and logs.
pub fn render_update_inline(
    target: &TableTarget,
    statement: &UpdateStatement,
    dialect: SqlDialect,
) -> Result<String, SqlRenderError> {
    check_statement(statement)?;

    let assignments = statement
        .set_clauses
        .iter()
        .map(|clause| {
            format!(
                "{} = {}",
                dialect.quote_identifier(&clause.column),
                dialect.literal(&clause.value)
            )
        })
        .collect::<Vec<_>>();
    let conditions = statement
        .where_clauses
        .iter()
        .map(|clause| {
            let column = dialect.quote_identifier(&clause.column);
            match &clause.condition {
                Condition::IsNull => format!("{column} IS NULL"),
                Condition::Equals(value) => format!("{column} = {}", dialect.literal(value)),
            }
        })
        .collect::<Vec<_>>();

    Ok(format!(
        "UPDATE {} SET {} WHERE {}",
        target.qualified(dialect),
        assignments.join(", "),
        conditions.join(" AND ")
    ))
}

/// One page of rows, ordered by the primary key when there is one so that
/// row indices stay stable between loads.
#[must_use]
pub fn page_select_sql(
    target: &TableTarget,
    columns: &[ColumnInfo],
    limit: usize,
    offset: usize,
    dialect: SqlDialect,
) -> String {
    let order_by = primary_key_columns(columns)
        .into_iter()
        .map(|column| format!("{} ASC", dialect.quote_identifier(&column.name)))
        .collect::<Vec<_>>();

    let table = target.qualified(dialect);
    if order_by.is_empty() {
        format!("SELECT * FROM {table} LIMIT {limit} OFFSET {offset}")
    } else {
        format!(
            "SELECT * FROM {table} ORDER BY {} LIMIT {limit} OFFSET {offset}",
            order_by.join(", ")
        )
    }
}
