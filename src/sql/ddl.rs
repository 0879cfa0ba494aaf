/// CREATE TABLE builder
///
/// Emits `CREATE TABLE IF NOT EXISTS` for a message descriptor: columns
/// in declaration order with their constraints and defaults, the
/// primary-key clause, named composite uniques, and the user-supplied
/// SQL fragments in their annotated positions.
use crate::schema::annotation::{effective_db_type, scalar_db_type, table_meta, DbType};
use crate::schema::descriptor::{ElemKind, FieldDescriptor, FieldKind, MessageDescriptor};
use crate::sql::dialect::Dialect;
use std::fmt::Write as _;
use std::sync::Arc;

/// Build the CREATE TABLE statement for a message type.
pub fn build_create_table(dialect: Dialect, schema: &str, desc: &Arc<MessageDescriptor>) -> String {
    let meta = table_meta(desc);
    let ann = &desc.annotation;
    let mut out = String::new();

    for line in &ann.sql_prepend {
        out.push_str(line);
        out.push('\n');
    }
    for comment in &ann.comments {
        let _ = writeln!(out, "-- {comment}");
    }
    let _ = writeln!(
        out,
        "CREATE TABLE IF NOT EXISTS {} (",
        dialect.qualify_table(schema, &desc.name)
    );

    let sole_pk = (meta.primary_keys.len() == 1).then(|| meta.primary_keys[0]);
    let mut entries: Vec<String> = Vec::new();

    for &i in &meta.db_fields {
        let field = &desc.fields[i];
        let fa = &field.annotation;
        let mut line = String::new();

        for comment in &fa.comments {
            let _ = writeln!(line, "  -- {comment}");
        }
        let _ = write!(line, "  {} {}", field.name, effective_db_type(field, dialect));

        if sole_pk != Some(i) {
            if fa.unique {
                line.push_str(" UNIQUE");
            }
            line.push_str(if fa.not_null { " NOT NULL" } else { " NULL" });
        }
        if fa.is_foreign_key() {
            let _ = write!(line, " REFERENCES {}", fa.reference);
        }
        if let Some(default) = column_default(field, dialect) {
            let _ = write!(line, " DEFAULT {default}");
        }
        for fragment in &fa.sql_append {
            line.push(' ');
            line.push_str(fragment);
        }
        entries.push(line);

        for fragment in &fa.sql_appends_end {
            entries.push(format!("  {fragment}"));
        }
    }

    if !meta.primary_keys.is_empty() {
        let names: Vec<&str> = meta
            .primary_keys
            .iter()
            .map(|&i| desc.fields[i].name.as_str())
            .collect();
        entries.push(format!("  PRIMARY KEY ({})", names.join(", ")));
    }
    for (_, members) in &meta.unique_groups {
        let names: Vec<&str> = members.iter().map(|&i| desc.fields[i].name.as_str()).collect();
        entries.push(format!("  UNIQUE ({})", names.join(", ")));
    }
    for fragment in &ann.sql_append {
        entries.push(format!("  {fragment}"));
    }

    out.push_str(&entries.join(",\n"));
    out.push_str("\n)");
    for line in &ann.sql_appends_after {
        out.push('\n');
        out.push_str(line);
    }
    out.push_str(";\n");
    for line in &ann.sql_appends_end {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// The DEFAULT clause for a column, when one applies.
///
/// An annotated default wins and is quoted by `quote_default`. List and
/// map columns whose type was not overridden get the empty-collection
/// default of their storage form.
fn column_default(field: &FieldDescriptor, dialect: Dialect) -> Option<String> {
    let fa = &field.annotation;
    if !fa.default_value.is_empty() {
        return Some(quote_default(&fa.default_value));
    }
    if !fa.db_type_str.is_empty() || fa.db_type != DbType::AutoMatch {
        return None;
    }
    match &field.kind {
        FieldKind::Repeated(ElemKind::Scalar(kind)) => {
            if dialect == Dialect::Postgres {
                Some(format!("'{{}}'::{}[]", scalar_db_type(*kind, dialect)))
            } else {
                Some("'[]'".to_string())
            }
        }
        FieldKind::Repeated(ElemKind::Message) => {
            if dialect == Dialect::Postgres {
                Some("'[]'::jsonb".to_string())
            } else {
                Some("'[]'".to_string())
            }
        }
        FieldKind::Map { .. } => {
            if dialect == Dialect::Postgres {
                Some("'{}'::jsonb".to_string())
            } else {
                Some("'{}'".to_string())
            }
        }
        _ => None,
    }
}

/// Quote a user-declared default value.
///
/// Integer, float and boolean literals pass through, as do values that
/// are already quoted or look like function calls. Everything else is
/// single-quoted with embedded quotes doubled.
pub fn quote_default(literal: &str) -> String {
    let lower = literal.to_ascii_lowercase();
    if lower == "true" || lower == "false" || lower == "null" {
        return literal.to_string();
    }
    if literal.parse::<f64>().is_ok() {
        return literal.to_string();
    }
    if literal.starts_with('\'') || literal.ends_with(')') {
        return literal.to_string();
    }
    format!("'{}'", literal.replace('\'', "''"))
}
