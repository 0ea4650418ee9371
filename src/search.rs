//! Embedding-backed search: a metadata filter AST compiled down to
//! `jsonb_path_exists` predicates, joined against the cosine-distance vector
//! query.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Double, Integer, Jsonb, Nullable, Text, Timestamptz};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::store::Message;

/// Metadata filter tree: `{"jsonpath": "..."}` is a leaf predicate evaluated
/// with Postgres's `jsonb_path_exists`; `and`/`or` combine child predicates.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFilter {
    Jsonpath(String),
    And(Vec<MetadataFilter>),
    Or(Vec<MetadataFilter>),
}

/// Compile a filter tree into a SQL boolean expression over `column`
/// (typically `m.metadata`). Single quotes inside a jsonpath literal are
/// doubled so the literal can't escape the enclosing SQL string.
pub fn compile_filter(filter: &MetadataFilter, column: &str) -> String {
    match filter {
        MetadataFilter::Jsonpath(path) => {
            let escaped = path.replace('\'', "''");
            format!("jsonb_path_exists({column}, '{escaped}')")
        }
        MetadataFilter::And(children) => {
            let parts: Vec<String> = children.iter().map(|c| compile_filter(c, column)).collect();
            format!("({})", parts.join(" AND "))
        }
        MetadataFilter::Or(children) => {
            let parts: Vec<String> = children.iter().map(|c| compile_filter(c, column)).collect();
            format!("({})", parts.join(" OR "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub message: Message,
    pub score: f32,
}

#[derive(QueryableByName)]
struct SearchRow {
    #[diesel(sql_type = BigInt)]
    sequence_id: i64,
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    id: Uuid,
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    session_id: Uuid,
    #[diesel(sql_type = Text)]
    role: String,
    #[diesel(sql_type = Text)]
    role_type: String,
    #[diesel(sql_type = Text)]
    content: String,
    #[diesel(sql_type = Integer)]
    token_count: i32,
    #[diesel(sql_type = Jsonb)]
    metadata: serde_json::Value,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    deleted_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Double)]
    score: f64,
    #[diesel(sql_type = Bool)]
    score_is_finite: bool,
}

impl From<SearchRow> for SearchResult {
    fn from(row: SearchRow) -> Self {
        SearchResult {
            message: Message {
                sequence_id: row.sequence_id,
                id: row.id,
                session_id: row.session_id,
                role: row.role,
                role_type: row.role_type,
                content: row.content,
                token_count: row.token_count,
                metadata: row.metadata,
                created_at: row.created_at,
                updated_at: row.updated_at,
                deleted_at: row.deleted_at,
            },
            score: row.score as f32,
        }
    }
}

/// Cosine-similarity search over a session's embedded messages, optionally
/// narrowed by a metadata filter. Rows whose distance comes back `NaN`
/// (possible against an unembedded placeholder's zero vector) are dropped
/// rather than surfaced as a bogus top score.
pub fn search_by_vector(
    conn: &mut PgConnection,
    session_id: Uuid,
    query_vector: &pgvector::Vector,
    filter: Option<&MetadataFilter>,
    limit: i64,
) -> Result<Vec<SearchResult>> {
    let filter_sql = filter
        .map(|f| format!(" AND {}", compile_filter(f, "m.metadata")))
        .unwrap_or_default();

    let sql = format!(
        "SELECT m.sequence_id, m.id, m.session_id, m.role, m.role_type, m.content, \
         m.token_count, m.metadata, m.created_at, m.updated_at, m.deleted_at, \
         (1 - (e.embedding <=> $1)) AS score, \
         (e.embedding <=> $1) = (e.embedding <=> $1) AS score_is_finite \
         FROM messages m \
         JOIN message_embedding e ON e.message_uuid = m.id AND e.session_id = m.session_id \
         WHERE m.session_id = $2 AND m.deleted_at IS NULL AND e.deleted_at IS NULL \
         AND e.is_embedded = true{filter_sql} \
         ORDER BY e.embedding <=> $1 \
         LIMIT $3"
    );

    let rows: Vec<SearchRow> = diesel::sql_query(sql)
        .bind::<pgvector::sql_types::Vector, _>(query_vector.clone())
        .bind::<diesel::sql_types::Uuid, _>(session_id)
        .bind::<BigInt, _>(limit)
        .get_results(conn)
        .map_err(MemoryError::from)?;

    Ok(rows
        .into_iter()
        .filter(|r| r.score_is_finite)
        .map(SearchResult::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_compiles_to_jsonb_path_exists() {
        let filter = MetadataFilter::Jsonpath("$.topic == \"billing\"".to_string());
        assert_eq!(
            compile_filter(&filter, "m.metadata"),
            r#"jsonb_path_exists(m.metadata, '$.topic == "billing"')"#
        );
    }

    #[test]
    fn single_quotes_in_jsonpath_are_doubled() {
        let filter = MetadataFilter::Jsonpath("$.name == \"O'Brien\"".to_string());
        let compiled = compile_filter(&filter, "m.metadata");
        assert!(compiled.contains("O''Brien"));
    }

    #[test]
    fn and_or_combine_with_parens() {
        let filter = MetadataFilter::And(vec![
            MetadataFilter::Jsonpath("$.a == 1".to_string()),
            MetadataFilter::Or(vec![
                MetadataFilter::Jsonpath("$.b == 2".to_string()),
                MetadataFilter::Jsonpath("$.c == 3".to_string()),
            ]),
        ]);

        let compiled = compile_filter(&filter, "m.metadata");
        assert_eq!(
            compiled,
            "(jsonb_path_exists(m.metadata, '$.a == 1') AND (jsonb_path_exists(m.metadata, '$.b == 2') OR jsonb_path_exists(m.metadata, '$.c == 3')))"
        );
    }

    #[test]
    fn deserializes_nested_and_or_json() {
        let json = serde_json::json!({
            "and": [
                {"jsonpath": "$.topic == \"billing\""},
                {"or": [{"jsonpath": "$.urgent == true"}]}
            ]
        });
        let filter: MetadataFilter = serde_json::from_value(json).unwrap();
        match filter {
            MetadataFilter::And(children) => assert_eq!(children.len(), 2),
            _ => panic!("expected And at the root"),
        }
    }
}
