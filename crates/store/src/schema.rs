use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a relation field on a parent row reaches the related table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    #[serde(rename = "one-to-one")]
    OneToOne,
    #[serde(rename = "one-to-many")]
    OneToMany,
    #[serde(rename = "many-to-one")]
    ManyToOne,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationKind,
    #[serde(rename = "relatedTable")]
    pub related_table: String,
    /// The field read off the parent row. Defaults to `id` for
    /// one-to-many (children point back at the parent's primary key).
    #[serde(rename = "fromField", default, skip_serializing_if = "Option::is_none")]
    pub from_field: Option<String>,
    /// For one-to-many, the foreign-key column on the child table; for
    /// many-to-one and one-to-one, the key field on the related table.
    #[serde(rename = "toField")]
    pub to_field: String,
}

impl Relationship {
    pub fn from_field(&self) -> &str {
        self.from_field.as_deref().unwrap_or(tidemark_value::ID_FIELD)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub relationships: BTreeMap<String, Relationship>,
}

/// Schema metadata: expected relations per table, plus the mapping from
/// top-level query field names to the tables they read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub tables: BTreeMap<String, TableSchema>,
    #[serde(rename = "queryFields", default)]
    pub query_fields: BTreeMap<String, String>,
}

impl Schema {
    pub fn table_for_query_field(&self, query_field: &str) -> Option<&str> {
        self.query_fields.get(query_field).map(String::as_str)
    }

    pub fn relationship(&self, table: &str, field: &str) -> Option<&Relationship> {
        self.tables.get(table)?.relationships.get(field)
    }

    /// The (table, column) pairs that need an index-backed lookup: the
    /// child side of every one-to-many relation.
    pub fn indexed_columns(&self) -> Vec<(String, String)> {
        let mut columns = Vec::new();
        for table_schema in self.tables.values() {
            for relationship in table_schema.relationships.values() {
                if relationship.kind == RelationKind::OneToMany {
                    let pair = (relationship.related_table.clone(), relationship.to_field.clone());
                    if !columns.contains(&pair) {
                        columns.push(pair);
                    }
                }
            }
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn schema_decodes_from_json() {
        let schema: Schema = serde_json::from_str(
            r#"{
              "tables": {
                "user": {
                  "relationships": {
                    "posts": {"kind": "one-to-many", "relatedTable": "post", "toField": "userId"}
                  }
                },
                "post": {
                  "relationships": {
                    "author": {"kind": "many-to-one", "relatedTable": "user", "fromField": "userId", "toField": "id"}
                  }
                }
              },
              "queryFields": {"user": "user", "post": "post"}
            }"#,
        )
        .unwrap();

        assert_eq!(schema.table_for_query_field("user"), Some("user"));
        let posts = schema.relationship("user", "posts").unwrap();
        assert_eq!(posts.kind, RelationKind::OneToMany);
        assert_eq!(posts.from_field(), "id");
        assert_eq!(schema.indexed_columns(), vec![("post".to_string(), "userId".to_string())]);
    }
}
