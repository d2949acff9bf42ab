use std::fmt;

use pg_escape::quote_identifier;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};

/// A fully qualified Postgres table name consisting of a schema and a table name.
///
/// Instances are produced by the table enumeration of a run and only ever reach query text
/// through [`TableName::as_quoted_identifier`].
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TableName {
    /// The schema name containing the table.
    pub schema: String,
    /// The name of the table within the schema.
    pub name: String,
}

impl TableName {
    /// Creates a new [`TableName`], rejecting names Postgres could never have produced.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> MirrorResult<TableName> {
        let schema = schema.into();
        let name = name.into();

        for part in [&schema, &name] {
            if part.is_empty() {
                bail!(
                    ErrorKind::InvalidTableName,
                    "Table name is invalid",
                    format!("empty identifier in table name `{schema}.{name}`")
                );
            }

            if part.contains('\0') {
                bail!(
                    ErrorKind::InvalidTableName,
                    "Table name is invalid",
                    format!("identifier `{}` contains a NUL character", part.escape_debug())
                );
            }
        }

        Ok(Self { schema, name })
    }

    /// Returns the table name as a Postgres identifier escaped according to Postgres quoting
    /// rules, safe to embed in query text.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}
