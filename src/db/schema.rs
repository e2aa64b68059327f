use crate::db::DbError;

/// A table that [`Metadata`] knows how to create.
///
/// Columns and constraints are raw SQL fragments supplied by the model code
/// that owns the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    name: String,
    columns: Vec<String>,
    constraints: Vec<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn column(mut self, definition: impl Into<String>) -> Self {
        self.columns.push(definition.into());
        self
    }

    pub fn constraint(mut self, definition: impl Into<String>) -> Self {
        self.constraints.push(definition.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the idempotent `CREATE TABLE IF NOT EXISTS` statement.
    ///
    /// # Examples
    /// ```
    /// use sessionpool::db::schema::TableDefinition;
    ///
    /// let table = TableDefinition::new("jobs")
    ///     .column("id UUID PRIMARY KEY")
    ///     .column("name TEXT NOT NULL");
    /// assert_eq!(
    ///     table.create_statement(),
    ///     r#"CREATE TABLE IF NOT EXISTS "jobs" (id UUID PRIMARY KEY, name TEXT NOT NULL)"#
    /// );
    /// ```
    pub fn create_statement(&self) -> String {
        let body = self
            .columns
            .iter()
            .chain(self.constraints.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", self.name, body)
    }
}

/// Registry of every table the application expects to exist.
///
/// Tables are created in registration order, so register referenced tables
/// before the tables holding foreign keys to them.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    tables: Vec<TableDefinition>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table to the registry.
    ///
    /// # Errors
    /// Returns `DbError::Configuration` if the name is not a plain identifier,
    /// the table has no columns, or a table with the same name is already
    /// registered.
    pub fn register(&mut self, table: TableDefinition) -> Result<&mut Self, DbError> {
        if !is_identifier(&table.name) {
            return Err(DbError::Configuration(format!(
                "invalid table name: {:?}",
                table.name
            )));
        }

        if table.columns.is_empty() {
            return Err(DbError::Configuration(format!(
                "table {} has no columns",
                table.name
            )));
        }

        if self.tables.iter().any(|t| t.name == table.name) {
            return Err(DbError::Configuration(format!(
                "table {} is already registered",
                table.name
            )));
        }

        tracing::debug!(table = %table.name, "Registered table definition");
        self.tables.push(table);
        Ok(self)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn create_all_statements(&self) -> Vec<String> {
        self.tables.iter().map(TableDefinition::create_statement).collect()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableDefinition {
        TableDefinition::new("users")
            .column("id UUID PRIMARY KEY")
            .column("email TEXT NOT NULL")
            .constraint("UNIQUE (email)")
    }

    #[test]
    fn test_create_statement_includes_constraints() {
        assert_eq!(
            users().create_statement(),
            r#"CREATE TABLE IF NOT EXISTS "users" (id UUID PRIMARY KEY, email TEXT NOT NULL, UNIQUE (email))"#
        );
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut metadata = Metadata::new();
        metadata
            .register(users())
            .unwrap()
            .register(
                TableDefinition::new("sessions")
                    .column("id UUID PRIMARY KEY")
                    .column("user_id UUID NOT NULL REFERENCES users(id)"),
            )
            .unwrap();

        let names: Vec<_> = metadata.tables().map(TableDefinition::name).collect();
        assert_eq!(names, vec!["users", "sessions"]);
        assert_eq!(metadata.create_all_statements().len(), 2);
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut metadata = Metadata::new();
        metadata.register(users()).unwrap();

        let result = metadata.register(users());
        assert!(matches!(result, Err(DbError::Configuration(_))));
        assert_eq!(metadata.len(), 1);
    }

    #[test]
    fn test_invalid_tables_rejected() {
        let mut metadata = Metadata::new();

        let quoted = TableDefinition::new("users\"; DROP TABLE x; --").column("id INT");
        assert!(metadata.register(quoted).is_err());

        assert!(metadata.register(TableDefinition::new("empty")).is_err());
        assert!(metadata.register(TableDefinition::new("").column("id INT")).is_err());
        assert!(metadata.is_empty());
    }
}
