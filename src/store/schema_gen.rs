use crate::schema::TableSchema;

/// Generate CREATE TABLE SQL for a table schema
pub fn generate_create_table(schema: &TableSchema) -> String {
    let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (\n", schema.name);
    let mut columns = Vec::new();

    for col in schema.columns {
        let pk = if col.primary_key { " PRIMARY KEY" } else { "" };
        let null_constraint = if !col.nullable { " NOT NULL" } else { "" };

        columns.push(format!(
            "    {} {}{}{}",
            col.name,
            col.col_type.sql_type(),
            pk,
            null_constraint
        ));
    }

    sql.push_str(&columns.join(",\n"));
    sql.push_str("\n)");

    sql
}

/// Generate CREATE INDEX statements for the schema's declared indexes
pub fn generate_indexes(schema: &TableSchema) -> Vec<String> {
    schema
        .indexes
        .iter()
        .map(|index| {
            format!(
                "CREATE {}INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
                if index.unique { "UNIQUE " } else { "" },
                schema.name,
                index.columns.join("_"),
                schema.name,
                index.columns.join(", ")
            )
        })
        .collect()
}

pub fn generate_drop_table(schema: &TableSchema) -> String {
    format!("DROP TABLE IF EXISTS {}", schema.name)
}

/// INSERT statement that leaves existing rows with the same natural key alone
pub fn generate_insert_or_skip(schema: &TableSchema) -> String {
    let columns = schema.insert_columns();
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
        schema.name,
        columns.join(", "),
        placeholders.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tables::{INGESTION_PROGRESS, OBSERVATIONS};

    #[test]
    fn test_generate_create_table() {
        let sql = generate_create_table(&OBSERVATIONS);
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS observations"));
        assert!(sql.contains("id INTEGER PRIMARY KEY NOT NULL,"));
        assert!(sql.contains("obs_id TEXT NOT NULL"));
        assert!(sql.contains("wavelength_min REAL,"));
        assert!(sql.contains("observation_date TEXT,"));
    }

    #[test]
    fn test_text_primary_key_is_not_null() {
        let sql = generate_create_table(&INGESTION_PROGRESS);
        assert!(sql.contains("month TEXT PRIMARY KEY NOT NULL"));
    }

    #[test]
    fn test_generate_indexes() {
        let indexes = generate_indexes(&OBSERVATIONS);
        assert!(indexes
            .iter()
            .any(|i| i == "CREATE UNIQUE INDEX IF NOT EXISTS idx_observations_obs_id ON observations(obs_id)"));
        assert!(indexes.iter().any(|i| i.contains("idx_observations_grating")));
    }

    #[test]
    fn test_generate_insert_or_skip() {
        let sql = generate_insert_or_skip(&OBSERVATIONS);
        assert!(sql.starts_with("INSERT INTO observations (obs_id, "));
        assert!(sql.ends_with("ON CONFLICT DO NOTHING"));
        assert_eq!(sql.matches('?').count(), OBSERVATIONS.columns.len() - 1);
    }
}
