/// CRUD statement builders
///
/// Every builder takes the message, the schema name and the dialect, and
/// returns the statement text plus its argument list. Builders never
/// execute SQL; an error aborts construction and returns nothing
/// executable. Identifiers that originate outside the schema pass the
/// guards in `sql::ident` before reaching statement text.
use crate::codec::encode::encode_field;
use crate::error::{MsgSqlError, Result};
use crate::schema::annotation::{table_meta, TableMeta};
use crate::schema::descriptor::{FieldDescriptor, FieldKind, MessageDescriptor};
use crate::schema::message::{scalar_from_json, Message, MsgValue};
use crate::sql::dialect::Dialect;
use crate::sql::ident::{check_expression, check_identifier};
use crate::types::SqlValue;
use std::fmt::Write as _;
use std::sync::Arc;

/// Build INSERT: `INSERT INTO <qt> (f1, ...) VALUES (p1, ...)[ RETURNING *];`
///
/// Serial fields and `no_insert`/`not_db` fields never appear. A zero
/// value binds NULL when the field carries a reference or `zero_as_null`,
/// and binds the declared default otherwise. With a `last_field_no`
/// cutoff, fields declared above the cutoff are omitted when they have a
/// default and rejected when they do not.
pub fn build_insert(
    msg: &Message,
    schema: &str,
    dialect: Dialect,
    returning: bool,
    last_field_no: u32,
) -> Result<(String, Vec<SqlValue>)> {
    let desc = msg.descriptor();
    let meta = table_meta(desc);

    let mut columns: Vec<&str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();

    for &i in &meta.db_fields {
        let field = &desc.fields[i];
        if !field.annotation.include_in_insert() {
            continue;
        }
        if last_field_no != 0 && field.tag > last_field_no {
            if field.annotation.default_value.is_empty() {
                return Err(MsgSqlError::MissingValue(format!(
                    "field '{}' is above the request cutoff and declares no default",
                    field.name
                )));
            }
            continue;
        }
        columns.push(&field.name);
        args.push(value_arg(msg, field, dialect)?);
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES (",
        dialect.qualify_table(schema, &desc.name),
        columns.join(", ")
    );
    for n in 1..=args.len() {
        if n > 1 {
            sql.push_str(", ");
        }
        dialect.push_placeholder(&mut sql, n);
    }
    sql.push(')');
    if returning {
        sql.push_str(" RETURNING *");
    }
    sql.push(';');
    Ok((sql, args))
}

/// Build UPDATE: `UPDATE <qt> SET f1 = p1, ... WHERE pk1 = px AND ...[ RETURNING *];`
///
/// Sets every field passing `include_in_update` with a tag at or below
/// the cutoff (when one is given). Primary-key fields go to the WHERE
/// clause and never to SET.
pub fn build_update(
    msg: &Message,
    schema: &str,
    dialect: Dialect,
    returning: bool,
    last_field_no: u32,
) -> Result<(String, Vec<SqlValue>)> {
    let desc = msg.descriptor();
    let meta = table_meta(desc);
    let set_fields = update_set_fields(desc, &meta, last_field_no)?;
    build_update_stmt(msg, schema, dialect, returning, &meta, &set_fields)
}

/// Build PARTIAL UPDATE: like UPDATE but restricted to an explicit
/// field-name list. Primary-key fields in the list are silently skipped.
pub fn build_partial_update(
    msg: &Message,
    schema: &str,
    dialect: Dialect,
    returning: bool,
    field_names: &[String],
) -> Result<(String, Vec<SqlValue>)> {
    let desc = msg.descriptor();
    let meta = table_meta(desc);
    let set_fields = partial_set_fields(desc, field_names)?;
    build_update_stmt(msg, schema, dialect, returning, &meta, &set_fields)
}

/// Build the OLD/NEW capture UPDATE as one statement:
///
/// ```sql
/// WITH old AS (SELECT * FROM <qt> WHERE pk = $1)
/// UPDATE <name> new SET f1 = $2, ... FROM old
/// WHERE new.pk = old.pk RETURNING old.*, new.*;
/// ```
///
/// The scanner splits the returned columns into the old and the new
/// message at the table's select-all column count.
pub fn build_update_old_new(
    msg: &Message,
    schema: &str,
    dialect: Dialect,
    last_field_no: u32,
    partial_fields: Option<&[String]>,
) -> Result<(String, Vec<SqlValue>)> {
    let desc = msg.descriptor();
    let meta = table_meta(desc);

    let set_fields = match partial_fields {
        Some(names) => partial_set_fields(desc, names)?,
        None => update_set_fields(desc, &meta, last_field_no)?,
    };
    let pk_fields = primary_key_fields(desc, &meta)?;

    let mut args: Vec<SqlValue> = Vec::new();
    let mut sql = format!(
        "WITH old AS (SELECT * FROM {} WHERE ",
        dialect.qualify_table(schema, &desc.name)
    );
    for (i, field) in pk_fields.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        let _ = write!(sql, "{} = ", field.name);
        dialect.push_placeholder(&mut sql, args.len() + 1);
        args.push(encode_field(field, dialect, msg.get(field.tag))?);
    }
    let _ = write!(sql, ") UPDATE {} new SET ", desc.name);
    for (i, field) in set_fields.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let _ = write!(sql, "{} = ", field.name);
        dialect.push_placeholder(&mut sql, args.len() + 1);
        args.push(value_arg(msg, field, dialect)?);
    }
    sql.push_str(" FROM old WHERE ");
    for (i, field) in pk_fields.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        let _ = write!(sql, "new.{name} = old.{name}", name = field.name);
    }
    sql.push_str(" RETURNING old.*, new.*;");
    Ok((sql, args))
}

/// Build DELETE: `DELETE FROM <qt> WHERE pk1 = p1 AND ...[ RETURNING *];`
pub fn build_delete(
    msg: &Message,
    schema: &str,
    dialect: Dialect,
    returning: bool,
) -> Result<(String, Vec<SqlValue>)> {
    let desc = msg.descriptor();
    let meta = table_meta(desc);
    let pk_fields = primary_key_fields(desc, &meta)?;

    let mut sql = format!("DELETE FROM {} WHERE ", dialect.qualify_table(schema, &desc.name));
    let mut args = Vec::with_capacity(pk_fields.len());
    for (i, field) in pk_fields.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        let _ = write!(sql, "{} = ", field.name);
        dialect.push_placeholder(&mut sql, args.len() + 1);
        args.push(encode_field(field, dialect, msg.get(field.tag))?);
    }
    if returning {
        sql.push_str(" RETURNING *");
    }
    sql.push(';');
    Ok((sql, args))
}

/// Build SELECT-ONE: `SELECT <cols|*> FROM <qt> WHERE k1 = p1 AND ...;`
///
/// The key column set defaults to the primary key. An explicit key list
/// must stay inside the primary-or-unique set.
pub fn build_select_one(
    msg: &Message,
    schema: &str,
    dialect: Dialect,
    key_fields: &[String],
    result_fields: &[String],
) -> Result<(String, Vec<SqlValue>)> {
    let desc = msg.descriptor();
    let meta = table_meta(desc);

    let projection = if result_fields.is_empty() {
        "*".to_string()
    } else {
        for expr in result_fields {
            check_expression(expr)?;
        }
        result_fields.join(", ")
    };

    let keys: Vec<&FieldDescriptor> = if key_fields.is_empty() {
        primary_key_fields(desc, &meta)?
    } else {
        check_identifier(key_fields)?;
        let mut out = Vec::with_capacity(key_fields.len());
        for name in key_fields {
            if !meta.is_key_name(name) {
                return Err(MsgSqlError::InvalidKey(format!(
                    "'{name}' is not a primary or unique key of '{}'",
                    desc.name
                )));
            }
            let field = desc
                .field(name)
                .ok_or_else(|| MsgSqlError::UnknownField(name.clone()))?;
            out.push(field);
        }
        out
    };

    let mut sql = format!(
        "SELECT {projection} FROM {} WHERE ",
        dialect.qualify_table(schema, &desc.name)
    );
    let mut args = Vec::with_capacity(keys.len());
    for (i, field) in keys.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        let _ = write!(sql, "{} = ", field.name);
        dialect.push_placeholder(&mut sql, args.len() + 1);
        args.push(encode_field(field, dialect, msg.get(field.tag))?);
    }
    sql.push(';');
    Ok((sql, args))
}

fn build_update_stmt(
    msg: &Message,
    schema: &str,
    dialect: Dialect,
    returning: bool,
    meta: &Arc<TableMeta>,
    set_fields: &[&FieldDescriptor],
) -> Result<(String, Vec<SqlValue>)> {
    let desc = msg.descriptor();
    let pk_fields = primary_key_fields(desc, meta)?;

    let mut sql = format!("UPDATE {} SET ", dialect.qualify_table(schema, &desc.name));
    let mut args: Vec<SqlValue> = Vec::new();
    for (i, field) in set_fields.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let _ = write!(sql, "{} = ", field.name);
        dialect.push_placeholder(&mut sql, args.len() + 1);
        args.push(value_arg(msg, field, dialect)?);
    }
    sql.push_str(" WHERE ");
    for (i, field) in pk_fields.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        let _ = write!(sql, "{} = ", field.name);
        dialect.push_placeholder(&mut sql, args.len() + 1);
        args.push(encode_field(field, dialect, msg.get(field.tag))?);
    }
    if returning {
        sql.push_str(" RETURNING *");
    }
    sql.push(';');
    Ok((sql, args))
}

fn update_set_fields<'a>(
    desc: &'a Arc<MessageDescriptor>,
    meta: &Arc<TableMeta>,
    last_field_no: u32,
) -> Result<Vec<&'a FieldDescriptor>> {
    let mut out = Vec::new();
    for &i in &meta.db_fields {
        let field = &desc.fields[i];
        if !field.annotation.include_in_update() {
            continue;
        }
        if last_field_no != 0 && field.tag > last_field_no {
            continue;
        }
        out.push(field);
    }
    if out.is_empty() {
        return Err(MsgSqlError::NothingToUpdate(desc.name.clone()));
    }
    Ok(out)
}

fn partial_set_fields<'a>(
    desc: &'a Arc<MessageDescriptor>,
    field_names: &[String],
) -> Result<Vec<&'a FieldDescriptor>> {
    check_identifier(field_names)?;
    let mut out = Vec::new();
    for name in field_names {
        let field = desc
            .field(name)
            .ok_or_else(|| MsgSqlError::UnknownField(name.clone()))?;
        // keys never move; annotated exclusions stay excluded
        if !field.annotation.include_in_update() {
            continue;
        }
        out.push(field);
    }
    if out.is_empty() {
        return Err(MsgSqlError::NothingToUpdate(desc.name.clone()));
    }
    Ok(out)
}

fn primary_key_fields<'a>(
    desc: &'a Arc<MessageDescriptor>,
    meta: &Arc<TableMeta>,
) -> Result<Vec<&'a FieldDescriptor>> {
    if meta.primary_keys.is_empty() {
        return Err(MsgSqlError::InvalidKey(format!(
            "table '{}' has no primary key",
            desc.name
        )));
    }
    Ok(meta.primary_keys.iter().map(|&i| &desc.fields[i]).collect())
}

/// Argument for a settable column: NULL for zero values of reference /
/// `zero_as_null` fields, the declared default for other zero values,
/// the encoded message value otherwise.
fn value_arg(msg: &Message, field: &FieldDescriptor, dialect: Dialect) -> Result<SqlValue> {
    if msg.is_zero(field) {
        let ann = &field.annotation;
        if ann.is_foreign_key() || ann.zero_as_null {
            return Ok(SqlValue::Null);
        }
        if !ann.default_value.is_empty() {
            return default_literal_arg(field, dialect);
        }
    }
    encode_field(field, dialect, msg.get(field.tag))
}

/// Convert a declared default literal through the same rules as a
/// message value of the field's kind.
fn default_literal_arg(field: &FieldDescriptor, dialect: Dialect) -> Result<SqlValue> {
    let literal = field.annotation.default_value.as_str();
    let unquoted = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(literal);

    if let FieldKind::Scalar(kind) = &field.kind {
        let value = scalar_from_json(*kind, &serde_json::Value::String(unquoted.to_string()))
            .map_err(|_| {
                MsgSqlError::Encode(format!(
                    "field '{}': default '{literal}' does not parse as {kind:?}",
                    field.name
                ))
            })?;
        return encode_field(field, dialect, Some(&value));
    }
    Ok(SqlValue::Text(unquoted.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::annotation::{FieldAnnotation, SerialType};
    use crate::schema::descriptor::{ElemKind, ScalarKind};

    fn users_desc() -> Arc<MessageDescriptor> {
        Arc::new(MessageDescriptor::new(
            "users",
            vec![
                FieldDescriptor::new("id", 1, FieldKind::Scalar(ScalarKind::Int64)).annotate(
                    FieldAnnotation {
                        primary: true,
                        serial_type: SerialType::Big,
                        ..Default::default()
                    },
                ),
                FieldDescriptor::new("name", 2, FieldKind::Scalar(ScalarKind::Str)),
                FieldDescriptor::new("org_id", 3, FieldKind::Scalar(ScalarKind::Int64)).annotate(
                    FieldAnnotation {
                        reference: "orgs(id)".into(),
                        ..Default::default()
                    },
                ),
                FieldDescriptor::new("state", 4, FieldKind::Scalar(ScalarKind::Str)).annotate(
                    FieldAnnotation {
                        default_value: "active".into(),
                        ..Default::default()
                    },
                ),
                FieldDescriptor::new(
                    "tags",
                    5,
                    FieldKind::Repeated(ElemKind::Scalar(ScalarKind::Str)),
                ),
            ],
        ))
    }

    fn sample_msg() -> Message {
        let mut msg = Message::new(users_desc());
        msg.set(1, MsgValue::I64(9));
        msg.set(2, MsgValue::Str("ada".into()));
        msg.set(3, MsgValue::I64(3));
        msg.set(4, MsgValue::Str("frozen".into()));
        msg.set(5, MsgValue::List(vec![MsgValue::Str("x".into())]));
        msg
    }

    #[test]
    fn test_insert_skips_serial_column() {
        let (sql, args) = build_insert(&sample_msg(), "app", Dialect::Postgres, false, 0).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO app.users (name, org_id, state, tags) VALUES ($1, $2, $3, $4);"
        );
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], SqlValue::Text("ada".into()));
        assert_eq!(args[3], SqlValue::TextArray(vec!["x".into()]));
    }

    #[test]
    fn test_insert_zero_handling() {
        let mut msg = Message::new(users_desc());
        msg.set(2, MsgValue::Str("ada".into()));
        // org_id unset + reference -> NULL; state unset + default -> literal
        let (_, args) = build_insert(&msg, "", Dialect::Postgres, false, 0).unwrap();
        assert_eq!(args[1], SqlValue::Null);
        assert_eq!(args[2], SqlValue::Text("active".into()));
    }

    #[test]
    fn test_insert_cutoff() {
        let msg = sample_msg();
        // tags (tag 5) has no default: a cutoff below it fails
        assert!(matches!(
            build_insert(&msg, "", Dialect::Postgres, false, 4),
            Err(MsgSqlError::MissingValue(_))
        ));
        // a cutoff at the highest tag leaves the statement complete
        let (sql, _) = build_insert(&msg, "", Dialect::Postgres, false, 5).unwrap();
        assert!(sql.contains("tags"));

        // state (tag 4) has a default, so a message cut at tag 3 omits it
        let narrow = Arc::new(MessageDescriptor::new(
            "t",
            vec![
                FieldDescriptor::new("a", 1, FieldKind::Scalar(ScalarKind::Int64)),
                FieldDescriptor::new("b", 4, FieldKind::Scalar(ScalarKind::Str)).annotate(
                    FieldAnnotation {
                        default_value: "x".into(),
                        ..Default::default()
                    },
                ),
            ],
        ));
        let mut m = Message::new(narrow);
        m.set(1, MsgValue::I64(1));
        let (sql, args) = build_insert(&m, "", Dialect::Postgres, false, 3).unwrap();
        assert_eq!(sql, "INSERT INTO t (a) VALUES ($1);");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_insert_returning_and_question_placeholders() {
        let (sql, _) = build_insert(&sample_msg(), "", Dialect::Sqlite, true, 0).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO users (name, org_id, state, tags) VALUES (?, ?, ?, ?) RETURNING *;"
        );
    }

    #[test]
    fn test_update_sets_non_keys_only() {
        let (sql, args) = build_update(&sample_msg(), "app", Dialect::Postgres, true, 0).unwrap();
        assert_eq!(
            sql,
            "UPDATE app.users SET name = $1, org_id = $2, state = $3, tags = $4 WHERE id = $5 RETURNING *;"
        );
        assert_eq!(args.len(), 5);
        assert_eq!(args[4], SqlValue::Int(9));
    }

    #[test]
    fn test_partial_update_skips_primary() {
        let fields = vec!["id".to_string(), "name".to_string()];
        let (sql, args) =
            build_partial_update(&sample_msg(), "", Dialect::Postgres, false, &fields).unwrap();
        assert_eq!(sql, "UPDATE users SET name = $1 WHERE id = $2;");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_partial_update_rejects_unknown_and_empty() {
        let unknown = vec!["ghost".to_string()];
        assert!(matches!(
            build_partial_update(&sample_msg(), "", Dialect::Postgres, false, &unknown),
            Err(MsgSqlError::UnknownField(_))
        ));

        let only_pk = vec!["id".to_string()];
        assert!(matches!(
            build_partial_update(&sample_msg(), "", Dialect::Postgres, false, &only_pk),
            Err(MsgSqlError::NothingToUpdate(_))
        ));
    }

    #[test]
    fn test_update_old_new_shape() {
        let (sql, args) =
            build_update_old_new(&sample_msg(), "app", Dialect::Postgres, 0, None).unwrap();
        assert_eq!(
            sql,
            "WITH old AS (SELECT * FROM app.users WHERE id = $1) \
             UPDATE users new SET name = $2, org_id = $3, state = $4, tags = $5 \
             FROM old WHERE new.id = old.id RETURNING old.*, new.*;"
        );
        assert_eq!(args.len(), 5);
        assert_eq!(args[0], SqlValue::Int(9));
    }

    #[test]
    fn test_delete_requires_primary_key() {
        let (sql, args) = build_delete(&sample_msg(), "", Dialect::Postgres, true).unwrap();
        assert_eq!(sql, "DELETE FROM users WHERE id = $1 RETURNING *;");
        assert_eq!(args, vec![SqlValue::Int(9)]);

        let no_pk = Arc::new(MessageDescriptor::new(
            "logs",
            vec![FieldDescriptor::new("line", 1, FieldKind::Scalar(ScalarKind::Str))],
        ));
        assert!(matches!(
            build_delete(&Message::new(no_pk), "", Dialect::Postgres, false),
            Err(MsgSqlError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_select_one_defaults_to_primary_key() {
        let (sql, args) = build_select_one(&sample_msg(), "", Dialect::Postgres, &[], &[]).unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE id = $1;");
        assert_eq!(args, vec![SqlValue::Int(9)]);
    }

    #[test]
    fn test_select_one_key_validation() {
        let bad = vec!["name".to_string()];
        assert!(matches!(
            build_select_one(&sample_msg(), "", Dialect::Postgres, &bad, &[]),
            Err(MsgSqlError::InvalidKey(_))
        ));

        let desc = Arc::new(MessageDescriptor::new(
            "t",
            vec![
                FieldDescriptor::new("id", 1, FieldKind::Scalar(ScalarKind::Int64)).annotate(
                    FieldAnnotation {
                        primary: true,
                        ..Default::default()
                    },
                ),
                FieldDescriptor::new("email", 2, FieldKind::Scalar(ScalarKind::Str)).annotate(
                    FieldAnnotation {
                        unique: true,
                        ..Default::default()
                    },
                ),
            ],
        ));
        let mut msg = Message::new(desc);
        msg.set(2, MsgValue::Str("a@b".into()));
        let keys = vec!["email".to_string()];
        let cols = vec!["id".to_string(), "email".to_string()];
        let (sql, args) = build_select_one(&msg, "", Dialect::Postgres, &keys, &cols).unwrap();
        assert_eq!(sql, "SELECT id, email FROM t WHERE email = $1;");
        assert_eq!(args, vec![SqlValue::Text("a@b".into())]);
    }

    #[test]
    fn test_builders_are_pure() {
        let msg = sample_msg();
        let a = build_update(&msg, "app", Dialect::Postgres, true, 0).unwrap();
        let b = build_update(&msg, "app", Dialect::Postgres, true, 0).unwrap();
        assert_eq!(a, b);
    }
}
