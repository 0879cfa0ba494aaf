/// Table-query compiler
///
/// Compiles a declarative `TableQueryReq` into a single SQL statement:
/// validated result columns, the AND-joined equality map, the
/// operator-typed `where2` map with its list/map/JSON operators, and
/// literal LIMIT/OFFSET. Placeholder indices advance monotonically
/// across all segments, starting after any indices the permission
/// fragment consumed.
use crate::codec::encode::encode_field;
use crate::codec::wire::MsgFormat;
use crate::error::{MsgSqlError, Result};
use crate::schema::annotation::scalar_db_type;
use crate::schema::descriptor::{ElemKind, FieldDescriptor, FieldKind, MessageDescriptor, ScalarKind};
use crate::schema::message::{scalar_from_json, MsgValue};
use crate::sql::dialect::Dialect;
use crate::sql::ident::{check_expression, check_identifier};
use crate::types::SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// Operators accepted in `where2_operator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Where2Op {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    /// Scalar equality, or list/map elementhood
    Contains,
    /// List subset
    ContainsAll,
    /// List intersection
    Overlap,
    LenGt,
    LenGte,
    LenLt,
    LenLte,
    /// Map key presence
    HasKey,
}

impl Where2Op {
    /// Comparison token for the scalar operators.
    fn scalar_cmp(self) -> Option<&'static str> {
        match self {
            Where2Op::Eq => Some("="),
            Where2Op::Gt => Some(">"),
            Where2Op::Lt => Some("<"),
            Where2Op::Gte => Some(">="),
            Where2Op::Lte => Some("<="),
            Where2Op::Like => Some("LIKE"),
            _ => None,
        }
    }

    /// Comparison token for the list-length operators.
    fn len_cmp(self) -> Option<&'static str> {
        match self {
            Where2Op::LenGt => Some(">"),
            Where2Op::LenGte => Some(">="),
            Where2Op::LenLt => Some("<"),
            Where2Op::LenLte => Some("<="),
            _ => None,
        }
    }
}

/// Declarative table query request.
#[derive(Debug, Clone, Default)]
pub struct TableQueryReq {
    pub schema_name: String,
    pub table_name: String,
    /// Projection; empty means `SELECT *`
    pub result_column_names: Vec<String>,
    /// AND-joined equalities, value bound as text
    pub where_eq: BTreeMap<String, String>,
    /// Operator-typed conditions, paired 1:1 with `where2_operator`
    pub where2: BTreeMap<String, String>,
    pub where2_operator: BTreeMap<String, Where2Op>,
    pub limit: u64,
    pub offset: u64,
    pub prefer_batch_size: u32,
    pub msg_format: MsgFormat,
}

/// Compile a table query to `(sql, args)`.
pub fn build_table_query(
    dialect: Dialect,
    desc: &Arc<MessageDescriptor>,
    req: &TableQueryReq,
    permission_where: Option<&str>,
    permission_args: &[SqlValue],
) -> Result<(String, Vec<SqlValue>)> {
    let mut sql = String::from("SELECT ");
    if req.result_column_names.is_empty() {
        sql.push('*');
    } else {
        for expr in &req.result_column_names {
            check_expression(expr)?;
        }
        sql.push_str(&req.result_column_names.join(", "));
    }
    let _ = write!(
        sql,
        " FROM {}",
        dialect.qualify_table(&req.schema_name, &req.table_name)
    );

    if req.where2.len() != req.where2_operator.len() {
        return Err(MsgSqlError::ValueParse(format!(
            "where2 carries {} entries but where2Operator carries {}",
            req.where2.len(),
            req.where2_operator.len()
        )));
    }

    let permission = permission_where.filter(|w| !w.is_empty());
    let mut args: Vec<SqlValue> = permission_args.to_vec();
    let has_where = permission.is_some() || !req.where_eq.is_empty() || !req.where2.is_empty();

    if has_where {
        sql.push_str(" WHERE ");
        let mut first = true;

        if let Some(fragment) = permission {
            let _ = write!(sql, "({fragment})");
            first = false;
        }

        for (name, value) in &req.where_eq {
            check_identifier(std::slice::from_ref(name))?;
            if !first {
                sql.push_str(" AND ");
            }
            first = false;
            let _ = write!(sql, "{name} = ");
            dialect.push_placeholder(&mut sql, args.len() + 1);
            args.push(SqlValue::Text(value.clone()));
        }

        for (name, value) in &req.where2 {
            let op = *req
                .where2_operator
                .get(name)
                .ok_or_else(|| {
                    MsgSqlError::ValueParse(format!("where2 field '{name}' has no operator"))
                })?;
            let field = desc
                .field(name)
                .ok_or_else(|| MsgSqlError::UnknownField(name.clone()))?;
            if !first {
                sql.push_str(" AND ");
            }
            first = false;
            push_where2(&mut sql, &mut args, dialect, field, op, value)?;
        }
    }

    if req.limit > 0 {
        let _ = write!(sql, " LIMIT {}", req.limit);
    }
    if req.offset > 0 {
        let _ = write!(sql, " OFFSET {}", req.offset);
    }
    Ok((sql, args))
}

fn push_where2(
    sql: &mut String,
    args: &mut Vec<SqlValue>,
    dialect: Dialect,
    field: &FieldDescriptor,
    op: Where2Op,
    value: &str,
) -> Result<()> {
    match &field.kind {
        FieldKind::Map { .. } => push_map_op(sql, args, dialect, field, op, value),
        FieldKind::Repeated(elem) => push_list_op(sql, args, dialect, field, elem, op, value),
        _ => {
            let cmp = op.scalar_cmp().ok_or_else(|| unsupported(field, op))?;
            let name = &field.name;
            let _ = write!(sql, "{name} {cmp} ");
            dialect.push_placeholder(sql, args.len() + 1);
            args.push(SqlValue::Text(value.to_string()));
            Ok(())
        }
    }
}

fn push_list_op(
    sql: &mut String,
    args: &mut Vec<SqlValue>,
    dialect: Dialect,
    field: &FieldDescriptor,
    elem: &ElemKind,
    op: Where2Op,
    value: &str,
) -> Result<()> {
    let name = &field.name;
    match dialect {
        Dialect::Postgres => match elem {
            ElemKind::Message => match op {
                Where2Op::Contains | Where2Op::ContainsAll => {
                    check_json(field, value, Json::is_array)?;
                    let _ = write!(sql, "{name} @> ");
                    dialect.push_placeholder(sql, args.len() + 1);
                    sql.push_str("::jsonb");
                    args.push(SqlValue::Text(value.to_string()));
                    Ok(())
                }
                _ => {
                    let cmp = op.len_cmp().ok_or_else(|| unsupported(field, op))?;
                    let _ = write!(sql, "jsonb_array_length({name}) {cmp} ");
                    dialect.push_placeholder(sql, args.len() + 1);
                    args.push(SqlValue::Int(parse_i64(field, value)?));
                    Ok(())
                }
            },
            ElemKind::Scalar(kind) => match op {
                Where2Op::Contains => {
                    let _ = write!(sql, "{name} @> ARRAY[");
                    dialect.push_placeholder(sql, args.len() + 1);
                    let _ = write!(sql, "]::{}[]", scalar_db_type(*kind, dialect));
                    args.push(parse_scalar_bind(field, *kind, value)?);
                    Ok(())
                }
                Where2Op::Overlap => {
                    let _ = write!(sql, "{name} && ");
                    dialect.push_placeholder(sql, args.len() + 1);
                    args.push(parse_typed_array(field, value)?);
                    Ok(())
                }
                Where2Op::ContainsAll => {
                    let _ = write!(sql, "{name} @> ");
                    dialect.push_placeholder(sql, args.len() + 1);
                    args.push(parse_typed_array(field, value)?);
                    Ok(())
                }
                _ => {
                    let cmp = op.len_cmp().ok_or_else(|| unsupported(field, op))?;
                    let _ = write!(sql, "cardinality({name}) {cmp} ");
                    dialect.push_placeholder(sql, args.len() + 1);
                    args.push(SqlValue::Int(parse_i64(field, value)?));
                    Ok(())
                }
            },
        },
        Dialect::Sqlite => match op {
            Where2Op::Contains => {
                let _ = write!(sql, "EXISTS (SELECT 1 FROM json_each({name}) WHERE value = ");
                dialect.push_placeholder(sql, args.len() + 1);
                sql.push(')');
                args.push(SqlValue::Text(value.to_string()));
                Ok(())
            }
            Where2Op::Overlap => {
                check_json(field, value, Json::is_array)?;
                let _ = write!(
                    sql,
                    "EXISTS (SELECT 1 FROM json_each({name}) a JOIN json_each("
                );
                dialect.push_placeholder(sql, args.len() + 1);
                sql.push_str(") b ON a.value = b.value)");
                args.push(SqlValue::Text(value.to_string()));
                Ok(())
            }
            Where2Op::ContainsAll => {
                check_json(field, value, Json::is_array)?;
                sql.push_str("NOT EXISTS (SELECT 1 FROM json_each(");
                dialect.push_placeholder(sql, args.len() + 1);
                let _ = write!(
                    sql,
                    ") b WHERE NOT EXISTS (SELECT 1 FROM json_each({name}) a WHERE a.value = b.value))"
                );
                args.push(SqlValue::Text(value.to_string()));
                Ok(())
            }
            _ => {
                let cmp = op.len_cmp().ok_or_else(|| unsupported(field, op))?;
                let _ = write!(sql, "json_array_length({name}) {cmp} ");
                dialect.push_placeholder(sql, args.len() + 1);
                args.push(SqlValue::Int(parse_i64(field, value)?));
                Ok(())
            }
        },
        _ => Err(unsupported(field, op)),
    }
}

fn push_map_op(
    sql: &mut String,
    args: &mut Vec<SqlValue>,
    dialect: Dialect,
    field: &FieldDescriptor,
    op: Where2Op,
    value: &str,
) -> Result<()> {
    let name = &field.name;
    match (dialect, op) {
        (Dialect::Postgres, Where2Op::HasKey) => {
            let _ = write!(sql, "{name} ? ");
            dialect.push_placeholder(sql, args.len() + 1);
            args.push(SqlValue::Text(value.to_string()));
            Ok(())
        }
        (Dialect::Postgres, Where2Op::Contains) => {
            check_json(field, value, Json::is_object)?;
            let _ = write!(sql, "{name} @> ");
            dialect.push_placeholder(sql, args.len() + 1);
            sql.push_str("::jsonb");
            args.push(SqlValue::Text(value.to_string()));
            Ok(())
        }
        (Dialect::MySql, Where2Op::HasKey) => {
            let _ = write!(sql, "JSON_CONTAINS_PATH({name}, 'one', CONCAT('$.', ");
            dialect.push_placeholder(sql, args.len() + 1);
            sql.push_str("))");
            args.push(SqlValue::Text(value.to_string()));
            Ok(())
        }
        (Dialect::MySql, Where2Op::Contains) => {
            check_json(field, value, Json::is_object)?;
            let _ = write!(sql, "JSON_CONTAINS({name}, CAST(");
            dialect.push_placeholder(sql, args.len() + 1);
            sql.push_str(" AS JSON))");
            args.push(SqlValue::Text(value.to_string()));
            Ok(())
        }
        (Dialect::Sqlite, Where2Op::HasKey) => {
            let _ = write!(sql, "EXISTS (SELECT 1 FROM json_each({name}) WHERE key = ");
            dialect.push_placeholder(sql, args.len() + 1);
            sql.push(')');
            args.push(SqlValue::Text(value.to_string()));
            Ok(())
        }
        (Dialect::Sqlite, Where2Op::Contains) => {
            check_json(field, value, Json::is_object)?;
            sql.push_str("NOT EXISTS (SELECT 1 FROM json_each(");
            dialect.push_placeholder(sql, args.len() + 1);
            let _ = write!(
                sql,
                ") b WHERE NOT EXISTS (SELECT 1 FROM json_each({name}) a WHERE a.key = b.key AND a.value = b.value))"
            );
            args.push(SqlValue::Text(value.to_string()));
            Ok(())
        }
        _ => Err(unsupported(field, op)),
    }
}

fn unsupported(field: &FieldDescriptor, op: Where2Op) -> MsgSqlError {
    MsgSqlError::UnsupportedOperator(format!(
        "operator {op:?} does not apply to field '{}' of kind {:?}",
        field.name, field.kind
    ))
}

fn parse_i64(field: &FieldDescriptor, value: &str) -> Result<i64> {
    value.parse::<i64>().map_err(|_| {
        MsgSqlError::ValueParse(format!("field '{}': bad integer '{value}'", field.name))
    })
}

fn check_json(field: &FieldDescriptor, value: &str, shape: impl Fn(&Json) -> bool) -> Result<()> {
    let json: Json = serde_json::from_str(value).map_err(|e| {
        MsgSqlError::ValueParse(format!("field '{}': malformed JSON operand: {e}", field.name))
    })?;
    if !shape(&json) {
        return Err(MsgSqlError::ValueParse(format!(
            "field '{}': JSON operand has the wrong shape",
            field.name
        )));
    }
    Ok(())
}

/// Parse a single atom into the element kind and bind it as the matching
/// driver primitive.
fn parse_scalar_bind(field: &FieldDescriptor, kind: ScalarKind, value: &str) -> Result<SqlValue> {
    let parsed = scalar_from_json(kind, &Json::String(value.to_string())).map_err(|e| {
        MsgSqlError::ValueParse(format!("field '{}': {e}", field.name))
    })?;
    Ok(match parsed {
        MsgValue::Bool(v) => SqlValue::Bool(v),
        MsgValue::I32(v) => SqlValue::Int(i64::from(v)),
        MsgValue::I64(v) => SqlValue::Int(v),
        MsgValue::U32(v) => SqlValue::Int(i64::from(v)),
        MsgValue::U64(v) => SqlValue::Int(v as i64),
        MsgValue::F32(v) => SqlValue::Float(f64::from(v)),
        MsgValue::F64(v) => SqlValue::Float(v),
        MsgValue::Str(v) => SqlValue::Text(v),
        other => {
            return Err(MsgSqlError::ValueParse(format!(
                "field '{}': atom parsed to unexpected {other:?}",
                field.name
            )))
        }
    })
}

/// Parse a JSON array operand into the field's typed Postgres array.
fn parse_typed_array(field: &FieldDescriptor, value: &str) -> Result<SqlValue> {
    let json: Json = serde_json::from_str(value).map_err(|e| {
        MsgSqlError::ValueParse(format!("field '{}': malformed JSON array: {e}", field.name))
    })?;
    let list = crate::schema::message::field_value_from_json(field, &json)
        .map_err(|e| MsgSqlError::ValueParse(format!("field '{}': {e}", field.name)))?;
    encode_field(field, Dialect::Postgres, Some(&list))
        .map_err(|e| MsgSqlError::ValueParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::FieldDescriptor;

    fn desc() -> Arc<MessageDescriptor> {
        Arc::new(MessageDescriptor::new(
            "t",
            vec![
                FieldDescriptor::new("id", 1, FieldKind::Scalar(ScalarKind::Int64)),
                FieldDescriptor::new(
                    "tags",
                    2,
                    FieldKind::Repeated(ElemKind::Scalar(ScalarKind::Str)),
                ),
                FieldDescriptor::new(
                    "m_int64_str",
                    3,
                    FieldKind::Map {
                        key: ScalarKind::Int64,
                        value: ElemKind::Scalar(ScalarKind::Str),
                    },
                ),
                FieldDescriptor::new(
                    "nums",
                    4,
                    FieldKind::Repeated(ElemKind::Scalar(ScalarKind::UInt64)),
                ),
            ],
        ))
    }

    fn req_with(field: &str, value: &str, op: Where2Op) -> TableQueryReq {
        let mut req = TableQueryReq {
            table_name: "t".into(),
            ..Default::default()
        };
        req.where2.insert(field.into(), value.into());
        req.where2_operator.insert(field.into(), op);
        req
    }

    #[test]
    fn test_repeated_string_contains_postgres() {
        let req = req_with("tags", "abc", Where2Op::Contains);
        let (sql, args) =
            build_table_query(Dialect::Postgres, &desc(), &req, None, &[]).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE tags @> ARRAY[$1]::text[]");
        assert_eq!(args, vec![SqlValue::Text("abc".into())]);
    }

    #[test]
    fn test_repeated_string_overlap_sqlite() {
        let req = req_with("tags", r#"["a","b"]"#, Where2Op::Overlap);
        let (sql, args) = build_table_query(Dialect::Sqlite, &desc(), &req, None, &[]).unwrap();
        assert!(sql.contains("json_each(tags)"));
        assert!(sql.contains("json_each(?)"));
        assert_eq!(args, vec![SqlValue::Text(r#"["a","b"]"#.into())]);
    }

    #[test]
    fn test_array_length_lt_sqlite() {
        let req = req_with("tags", "4", Where2Op::LenLt);
        let (sql, args) = build_table_query(Dialect::Sqlite, &desc(), &req, None, &[]).unwrap();
        assert!(sql.contains("json_array_length(tags) < ?"));
        assert_eq!(args, vec![SqlValue::Int(4)]);
    }

    #[test]
    fn test_map_has_key_postgres() {
        let req = req_with("m_int64_str", "1", Where2Op::HasKey);
        let (sql, args) =
            build_table_query(Dialect::Postgres, &desc(), &req, None, &[]).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE m_int64_str ? $1");
        assert_eq!(args, vec![SqlValue::Text("1".into())]);
    }

    #[test]
    fn test_map_ops_mysql() {
        let req = req_with("m_int64_str", "1", Where2Op::HasKey);
        let (sql, _) = build_table_query(Dialect::MySql, &desc(), &req, None, &[]).unwrap();
        assert!(sql.contains("JSON_CONTAINS_PATH(m_int64_str, 'one', CONCAT('$.', ?))"));

        let req = req_with("m_int64_str", r#"{"1":"x"}"#, Where2Op::Contains);
        let (sql, _) = build_table_query(Dialect::MySql, &desc(), &req, None, &[]).unwrap();
        assert!(sql.contains("JSON_CONTAINS(m_int64_str, CAST(? AS JSON))"));
    }

    #[test]
    fn test_overlap_binds_typed_array() {
        let req = req_with("nums", "[1,2]", Where2Op::Overlap);
        let (sql, args) =
            build_table_query(Dialect::Postgres, &desc(), &req, None, &[]).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE nums && $1");
        assert_eq!(args, vec![SqlValue::IntArray(vec![1, 2])]);
    }

    #[test]
    fn test_permission_fragment_offsets_placeholders() {
        let mut req = req_with("tags", "abc", Where2Op::Contains);
        req.where_eq.insert("id".into(), "7".into());
        let (sql, args) = build_table_query(
            Dialect::Postgres,
            &desc(),
            &req,
            Some("org_id = $1"),
            &[SqlValue::Int(3)],
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE (org_id = $1) AND id = $2 AND tags @> ARRAY[$3]::text[]"
        );
        assert_eq!(
            args,
            vec![
                SqlValue::Int(3),
                SqlValue::Text("7".into()),
                SqlValue::Text("abc".into())
            ]
        );
    }

    #[test]
    fn test_projection_limit_offset() {
        let mut req = TableQueryReq {
            schema_name: "app".into(),
            table_name: "t".into(),
            result_column_names: vec!["id".into(), "count(*)".into()],
            limit: 10,
            offset: 20,
            ..Default::default()
        };
        req.where_eq.insert("id".into(), "1".into());
        let (sql, _) = build_table_query(Dialect::Postgres, &desc(), &req, None, &[]).unwrap();
        assert_eq!(
            sql,
            "SELECT id, count(*) FROM app.t WHERE id = $1 LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_compile_is_deterministic() {
        let mut req = TableQueryReq {
            table_name: "t".into(),
            ..Default::default()
        };
        req.where_eq.insert("b".into(), "2".into());
        req.where_eq.insert("a".into(), "1".into());
        req.where2.insert("tags".into(), "x".into());
        req.where2_operator.insert("tags".into(), Where2Op::Contains);

        let a = build_table_query(Dialect::Postgres, &desc(), &req, None, &[]);
        let b = build_table_query(Dialect::Postgres, &desc(), &req, None, &[]);
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn test_error_paths() {
        // unknown field
        let req = req_with("ghost", "1", Where2Op::Eq);
        assert!(matches!(
            build_table_query(Dialect::Postgres, &desc(), &req, None, &[]),
            Err(MsgSqlError::UnknownField(_))
        ));

        // operator/field mismatch
        let req = req_with("id", "1", Where2Op::HasKey);
        assert!(matches!(
            build_table_query(Dialect::Postgres, &desc(), &req, None, &[]),
            Err(MsgSqlError::UnsupportedOperator(_))
        ));

        // malformed operand
        let req = req_with("nums", "[1,\"x\"]", Where2Op::Overlap);
        assert!(matches!(
            build_table_query(Dialect::Postgres, &desc(), &req, None, &[]),
            Err(MsgSqlError::ValueParse(_))
        ));

        // unpaired where2
        let mut req = TableQueryReq {
            table_name: "t".into(),
            ..Default::default()
        };
        req.where2.insert("id".into(), "1".into());
        assert!(matches!(
            build_table_query(Dialect::Postgres, &desc(), &req, None, &[]),
            Err(MsgSqlError::ValueParse(_))
        ));

        // injection in a projection column
        let req = TableQueryReq {
            table_name: "t".into(),
            result_column_names: vec!["id; drop table t".into()],
            ..Default::default()
        };
        assert!(matches!(
            build_table_query(Dialect::Postgres, &desc(), &req, None, &[]),
            Err(MsgSqlError::Identifier(_))
        ));
    }
}
