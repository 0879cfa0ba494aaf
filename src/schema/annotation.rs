/// Field and message annotations
///
/// Annotations are the per-field / per-message records that drive DDL and
/// DML generation. Absent annotations read as the empty record; accessors
/// never fail. The derived `TableMeta` record is computed once per
/// descriptor identity and cached.
use crate::schema::descriptor::{ElemKind, FieldDescriptor, FieldKind, MessageDescriptor, ScalarKind};
use crate::sql::dialect::Dialect;
use ahash::{AHashMap, AHashSet};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock, Weak};

/// Declared column type override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DbType {
    #[default]
    AutoMatch,
    Bool,
    Int32,
    UInt32,
    Int64,
    Float,
    Double,
    Text,
    Jsonb,
    Uuid,
    Timestamp,
    Date,
    Bytea,
    Inet,
}

/// Serial column width. Non-`None` values exclude the field from the
/// INSERT value list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialType {
    #[default]
    None,
    /// smallserial
    Small,
    /// serial
    Normal,
    /// bigserial
    Big,
}

/// Per-field annotation record.
#[derive(Debug, Clone, Default)]
pub struct FieldAnnotation {
    /// Exclude from DDL and DML entirely
    pub not_db: bool,
    /// Primary key member
    pub primary: bool,
    /// Single-column UNIQUE constraint
    pub unique: bool,
    /// Named composite unique group
    pub unique_name: String,
    /// NOT NULL column
    pub not_null: bool,
    /// Exclude from UPDATE SET lists
    pub no_update: bool,
    /// Exclude from INSERT column lists
    pub no_insert: bool,
    /// Bind NULL when the message value is the kind's zero
    pub zero_as_null: bool,
    /// Foreign-key tail, e.g. "users(id) ON DELETE CASCADE"
    pub reference: String,
    /// Default SQL literal or expression
    pub default_value: String,
    /// Declared column type
    pub db_type: DbType,
    /// Verbatim column type override
    pub db_type_str: String,
    /// Serial width
    pub serial_type: SerialType,
    /// Extra SQL appended to the column definition
    pub sql_append: Vec<String>,
    /// Extra SQL emitted after the column definition line
    pub sql_appends_end: Vec<String>,
    /// Comment lines emitted above the column
    pub comments: Vec<String>,
}

impl FieldAnnotation {
    /// Field participates in INSERT column lists.
    pub fn include_in_insert(&self) -> bool {
        !self.not_db && !self.no_insert && self.serial_type == SerialType::None
    }

    /// Field participates in UPDATE SET lists.
    pub fn include_in_update(&self) -> bool {
        !self.not_db && !self.no_update && !self.primary
    }

    /// Field references another table.
    pub fn is_foreign_key(&self) -> bool {
        !self.reference.is_empty()
    }
}

/// Per-message annotation record.
#[derive(Debug, Clone, Default)]
pub struct MessageAnnotation {
    /// Multi-field primary key, used when no field-level primary exists
    pub primary_keys: Vec<String>,
    /// SQL emitted before the CREATE TABLE statement
    pub sql_prepend: Vec<String>,
    /// SQL emitted inside the column list, after the constraints
    pub sql_append: Vec<String>,
    /// SQL emitted after the closing parenthesis, before the semicolon
    pub sql_appends_after: Vec<String>,
    /// SQL emitted after the whole statement
    pub sql_appends_end: Vec<String>,
    /// Comment lines emitted above the statement
    pub comments: Vec<String>,
}

/// Column type name for a scalar kind.
pub fn scalar_db_type(kind: ScalarKind, dialect: Dialect) -> &'static str {
    match kind {
        ScalarKind::Bool => "boolean",
        ScalarKind::Int32 => "integer",
        // uint kinds fold to bigint so the full unsigned range fits
        ScalarKind::UInt32 | ScalarKind::UInt64 | ScalarKind::Int64 => "bigint",
        ScalarKind::Float => "real",
        ScalarKind::Double => "double precision",
        ScalarKind::Str => "text",
        ScalarKind::Bytes => {
            if dialect == Dialect::Postgres {
                "bytea"
            } else {
                "text"
            }
        }
        ScalarKind::Enum => "integer",
    }
}

fn declared_db_type(db_type: DbType, dialect: Dialect) -> &'static str {
    match db_type {
        DbType::AutoMatch => "",
        DbType::Bool => "boolean",
        DbType::Int32 => "integer",
        DbType::UInt32 | DbType::Int64 => "bigint",
        DbType::Float => "real",
        DbType::Double => "double precision",
        DbType::Text => "text",
        DbType::Jsonb => {
            if dialect == Dialect::Postgres {
                "jsonb"
            } else {
                "text"
            }
        }
        DbType::Uuid => {
            if dialect == Dialect::Postgres {
                "uuid"
            } else {
                "text"
            }
        }
        DbType::Timestamp => "timestamp",
        DbType::Date => "date",
        DbType::Bytea => {
            if dialect == Dialect::Postgres {
                "bytea"
            } else {
                "text"
            }
        }
        DbType::Inet => {
            if dialect == Dialect::Postgres {
                "inet"
            } else {
                "text"
            }
        }
    }
}

/// Effective column type of a scalar or nested-message field.
///
/// Resolution order: verbatim `db_type_str`, serial width, declared
/// `db_type`, kind default. Repeated and map defaults are applied by the
/// DDL builder.
pub fn effective_db_type(field: &FieldDescriptor, dialect: Dialect) -> String {
    let ann = &field.annotation;
    if !ann.db_type_str.is_empty() {
        return ann.db_type_str.clone();
    }
    match ann.serial_type {
        SerialType::Small => return "smallserial".to_string(),
        SerialType::Normal => return "serial".to_string(),
        SerialType::Big => return "bigserial".to_string(),
        SerialType::None => {}
    }
    let declared = declared_db_type(ann.db_type, dialect);
    if !declared.is_empty() {
        return declared.to_string();
    }
    match &field.kind {
        FieldKind::Scalar(kind) => scalar_db_type(*kind, dialect).to_string(),
        FieldKind::Message => {
            if dialect == Dialect::Postgres {
                "jsonb".to_string()
            } else {
                "text".to_string()
            }
        }
        // Placeholder for list/map fields when called outside the DDL
        // builder's specialized handling.
        FieldKind::Repeated(ElemKind::Scalar(kind)) => {
            if dialect == Dialect::Postgres {
                format!("{}[]", scalar_db_type(*kind, dialect))
            } else {
                "text".to_string()
            }
        }
        FieldKind::Repeated(ElemKind::Message) | FieldKind::Map { .. } => {
            if dialect == Dialect::Postgres {
                "jsonb".to_string()
            } else {
                "text".to_string()
            }
        }
    }
}

/// Derived per-descriptor record: which fields reach the database, the
/// primary-key set, and the unique groups.
#[derive(Debug)]
pub struct TableMeta {
    /// Indexes into `fields` of every db-visible field, declaration order
    pub db_fields: Vec<usize>,
    /// Indexes of the primary-key fields: field-level `primary` flags
    /// when any exist, else the message-level `primary_keys` list
    pub primary_keys: Vec<usize>,
    /// Named composite unique groups, sorted by group name
    pub unique_groups: Vec<(String, Vec<usize>)>,
    /// Names of every field in the primary-or-unique set
    pub key_names: AHashSet<String>,
}

impl TableMeta {
    fn derive(desc: &MessageDescriptor) -> Self {
        let mut db_fields = Vec::new();
        let mut primary_keys = Vec::new();
        let mut groups: AHashMap<String, Vec<usize>> = AHashMap::new();
        let mut key_names = AHashSet::new();

        for (i, field) in desc.fields.iter().enumerate() {
            let ann = &field.annotation;
            if ann.not_db {
                continue;
            }
            db_fields.push(i);
            if ann.primary {
                primary_keys.push(i);
                key_names.insert(field.name.clone());
            }
            if ann.unique {
                key_names.insert(field.name.clone());
            }
            if !ann.unique_name.is_empty() {
                groups.entry(ann.unique_name.clone()).or_default().push(i);
                key_names.insert(field.name.clone());
            }
        }

        // Message-level key list applies only when no field is marked
        if primary_keys.is_empty() {
            for name in &desc.annotation.primary_keys {
                if let Some(&i) = db_fields.iter().find(|&&i| desc.fields[i].name == *name) {
                    primary_keys.push(i);
                    key_names.insert(name.clone());
                }
            }
        }

        let mut unique_groups: Vec<_> = groups.into_iter().collect();
        unique_groups.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            db_fields,
            primary_keys,
            unique_groups,
            key_names,
        }
    }

    /// Column count of the table's select-all projection.
    pub fn column_count(&self) -> usize {
        self.db_fields.len()
    }

    /// Whether a name belongs to the primary-or-unique key set.
    pub fn is_key_name(&self, name: &str) -> bool {
        self.key_names.contains(name)
    }
}

static META_CACHE: OnceLock<DashMap<usize, (Weak<MessageDescriptor>, Arc<TableMeta>)>> =
    OnceLock::new();

/// Derived metadata for a descriptor, cached by descriptor identity.
///
/// The weak handle guards against an address being reused by a new
/// descriptor after the old one is dropped.
pub fn table_meta(desc: &Arc<MessageDescriptor>) -> Arc<TableMeta> {
    let cache = META_CACHE.get_or_init(DashMap::new);
    let key = Arc::as_ptr(desc) as usize;
    if let Some(entry) = cache.get(&key) {
        if entry.0.upgrade().is_some_and(|live| Arc::ptr_eq(&live, desc)) {
            return entry.1.clone();
        }
    }
    let meta = Arc::new(TableMeta::derive(desc));
    cache.insert(key, (Arc::downgrade(desc), meta.clone()));
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::FieldDescriptor;

    fn field(name: &str, tag: u32, ann: FieldAnnotation) -> FieldDescriptor {
        FieldDescriptor::new(name, tag, FieldKind::Scalar(ScalarKind::Int64)).annotate(ann)
    }

    #[test]
    fn test_insert_update_predicates() {
        let serial = FieldAnnotation {
            serial_type: SerialType::Big,
            ..Default::default()
        };
        assert!(!serial.include_in_insert());
        assert!(serial.include_in_update());

        let primary = FieldAnnotation {
            primary: true,
            ..Default::default()
        };
        assert!(primary.include_in_insert());
        assert!(!primary.include_in_update());

        let hidden = FieldAnnotation {
            not_db: true,
            ..Default::default()
        };
        assert!(!hidden.include_in_insert());
        assert!(!hidden.include_in_update());
    }

    #[test]
    fn test_effective_db_type_resolution() {
        let verbatim = field(
            "a",
            1,
            FieldAnnotation {
                db_type_str: "numeric(10,2)".into(),
                ..Default::default()
            },
        );
        assert_eq!(effective_db_type(&verbatim, Dialect::Postgres), "numeric(10,2)");

        let serial = field(
            "b",
            2,
            FieldAnnotation {
                serial_type: SerialType::Normal,
                ..Default::default()
            },
        );
        assert_eq!(effective_db_type(&serial, Dialect::Postgres), "serial");

        let auto = field("c", 3, FieldAnnotation::default());
        assert_eq!(effective_db_type(&auto, Dialect::Postgres), "bigint");

        let uint_list = FieldDescriptor::new(
            "d",
            4,
            FieldKind::Repeated(ElemKind::Scalar(ScalarKind::UInt64)),
        );
        assert_eq!(effective_db_type(&uint_list, Dialect::Postgres), "bigint[]");
        assert_eq!(effective_db_type(&uint_list, Dialect::Sqlite), "text");
    }

    #[test]
    fn test_table_meta_field_level_primary() {
        let desc = Arc::new(MessageDescriptor::new(
            "t",
            vec![
                field(
                    "id",
                    1,
                    FieldAnnotation {
                        primary: true,
                        ..Default::default()
                    },
                ),
                field(
                    "email",
                    2,
                    FieldAnnotation {
                        unique: true,
                        ..Default::default()
                    },
                ),
                field(
                    "memo",
                    3,
                    FieldAnnotation {
                        not_db: true,
                        ..Default::default()
                    },
                ),
            ],
        ));

        let meta = table_meta(&desc);
        assert_eq!(meta.db_fields.len(), 2);
        assert_eq!(meta.primary_keys, vec![0]);
        assert!(meta.is_key_name("id"));
        assert!(meta.is_key_name("email"));
        assert!(!meta.is_key_name("memo"));

        // second lookup hits the cache and agrees
        let again = table_meta(&desc);
        assert_eq!(again.primary_keys, meta.primary_keys);
    }

    #[test]
    fn test_table_meta_message_level_primary() {
        let desc = Arc::new(
            MessageDescriptor::new(
                "t",
                vec![
                    field("a", 1, FieldAnnotation::default()),
                    field("b", 2, FieldAnnotation::default()),
                ],
            )
            .with_annotation(MessageAnnotation {
                primary_keys: vec!["b".into(), "a".into()],
                ..Default::default()
            }),
        );

        let meta = table_meta(&desc);
        let names: Vec<_> = meta
            .primary_keys
            .iter()
            .map(|&i| desc.fields[i].name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_named_unique_groups_sorted() {
        let desc = Arc::new(MessageDescriptor::new(
            "t",
            vec![
                field(
                    "x",
                    1,
                    FieldAnnotation {
                        unique_name: "zz".into(),
                        ..Default::default()
                    },
                ),
                field(
                    "y",
                    2,
                    FieldAnnotation {
                        unique_name: "aa".into(),
                        ..Default::default()
                    },
                ),
            ],
        ));

        let meta = table_meta(&desc);
        let names: Vec<_> = meta.unique_groups.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["aa", "zz"]);
    }
}
