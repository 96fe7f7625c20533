//! File metadata store.
//!
//! Maps content identifiers to descriptive records in SQLite. The
//! `identifier` primary key doubles as the dedup arbiter: concurrent uploads
//! of identical content race through [`FileMetadataStore::create_if_absent`],
//! and the store's uniqueness constraint, not application logic, decides
//! the winner.

use crate::models::file_record::FileRecord;
use serde::Deserialize;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;

const SELECT_COLUMNS: &str =
    "SELECT identifier, title, description, mime_type, size_bytes, uploaded_at FROM files";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    UploadedAt,
    Size,
}

impl SortField {
    fn column(self) -> &'static str {
        match self {
            SortField::UploadedAt => "uploaded_at",
            SortField::Size => "size_bytes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filtered, sorted, paginated listing parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    /// Substring match on the MIME type, e.g. `image` or `image/png`.
    pub mime_type: Option<String>,
    /// Free-text search over title and description.
    pub search: Option<String>,
    pub sort_by: Option<SortField>,
    pub sort: Option<SortOrder>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Outcome of an atomic insert-or-conflict.
#[derive(Debug)]
pub enum InsertOutcome {
    Created(FileRecord),
    Exists(FileRecord),
}

#[derive(Clone)]
pub struct FileMetadataStore {
    db: Arc<SqlitePool>,
}

impl FileMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn get(&self, identifier: &str) -> Result<Option<FileRecord>, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(&format!("{} WHERE identifier = ?", SELECT_COLUMNS))
            .bind(identifier)
            .fetch_optional(&*self.db)
            .await
    }

    /// Insert the record unless one already exists for the identifier.
    ///
    /// Never overwrites: a conflicting insert returns the committed record so
    /// the losing uploader can reference the winner.
    pub async fn create_if_absent(&self, record: FileRecord) -> Result<InsertOutcome, sqlx::Error> {
        // Bounded retry covers the sliver where the conflicting record is
        // deleted between our insert attempt and the follow-up read.
        for _ in 0..2 {
            let result = sqlx::query(
                "INSERT INTO files (identifier, title, description, mime_type, size_bytes, uploaded_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(identifier) DO NOTHING",
            )
            .bind(&record.identifier)
            .bind(&record.title)
            .bind(&record.description)
            .bind(&record.mime_type)
            .bind(record.size_bytes)
            .bind(record.uploaded_at)
            .execute(&*self.db)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(InsertOutcome::Created(record));
            }
            if let Some(existing) = self.get(&record.identifier).await? {
                return Ok(InsertOutcome::Exists(existing));
            }
        }
        Err(sqlx::Error::RowNotFound)
    }

    /// Update title and/or description, leaving omitted fields untouched.
    pub async fn update_info(
        &self,
        identifier: &str,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Option<FileRecord>, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(
            "UPDATE files
             SET title = COALESCE(?, title), description = COALESCE(?, description)
             WHERE identifier = ?
             RETURNING identifier, title, description, mime_type, size_bytes, uploaded_at",
        )
        .bind(title)
        .bind(description)
        .bind(identifier)
        .fetch_optional(&*self.db)
        .await
    }

    /// Remove the record. Returns false when no record existed.
    pub async fn delete(&self, identifier: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM files WHERE identifier = ?")
            .bind(identifier)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Vec<FileRecord>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        let mut first = true;
        let mut push_condition = |builder: &mut QueryBuilder<Sqlite>| {
            builder.push(if first { " WHERE " } else { " AND " });
            first = false;
        };

        if let Some(mime) = &query.mime_type {
            push_condition(&mut builder);
            builder.push("mime_type LIKE ");
            builder.push_bind(format!("%{}%", mime));
        }
        if let Some(search) = &query.search {
            push_condition(&mut builder);
            let pattern = format!("%{}%", search);
            builder.push("(title LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR description LIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        match (query.sort_by, query.sort) {
            (Some(field), order) => {
                builder.push(" ORDER BY ");
                builder.push(field.column());
                builder.push(" ");
                builder.push(order.unwrap_or(SortOrder::Asc).keyword());
            }
            // newest first by default
            (None, _) => {
                builder.push(" ORDER BY uploaded_at DESC");
            }
        }

        let limit = query.limit.unwrap_or(100).clamp(1, 1000);
        builder.push(" LIMIT ");
        builder.push_bind(limit as i64);
        builder.push(" OFFSET ");
        builder.push_bind(query.offset.unwrap_or(0) as i64);

        builder.build_query_as().fetch_all(&*self.db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_pool;
    use chrono::{Duration, Utc};

    fn record(identifier: &str, mime: &str, size: i64, age_minutes: i64) -> FileRecord {
        FileRecord {
            identifier: identifier.to_string(),
            title: Some(format!("title-{}", identifier)),
            description: Some(String::new()),
            mime_type: mime.to_string(),
            size_bytes: size,
            uploaded_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[tokio::test]
    async fn create_if_absent_is_atomic_arbitration() {
        let store = FileMetadataStore::new(test_pool().await);
        let first = record("aa.jpg", "image/jpeg", 10, 0);
        assert!(matches!(
            store.create_if_absent(first.clone()).await.unwrap(),
            InsertOutcome::Created(_)
        ));

        let loser = record("aa.jpg", "image/jpeg", 10, 0);
        match store.create_if_absent(loser).await.unwrap() {
            InsertOutcome::Exists(existing) => {
                assert_eq!(existing.title, first.title);
            }
            InsertOutcome::Created(_) => panic!("second insert must lose"),
        }
    }

    #[tokio::test]
    async fn update_info_touches_only_provided_fields() {
        let store = FileMetadataStore::new(test_pool().await);
        store
            .create_if_absent(record("bb.png", "image/png", 5, 0))
            .await
            .unwrap();

        let updated = store
            .update_info("bb.png", Some("renamed".into()), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title.as_deref(), Some("renamed"));
        assert_eq!(updated.description.as_deref(), Some(""));

        assert!(store.update_info("missing", None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_absence() {
        let store = FileMetadataStore::new(test_pool().await);
        store
            .create_if_absent(record("cc.gif", "image/gif", 7, 0))
            .await
            .unwrap();
        assert!(store.delete("cc.gif").await.unwrap());
        assert!(!store.delete("cc.gif").await.unwrap());
        assert!(store.get("cc.gif").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_sorts_and_paginates() {
        let store = FileMetadataStore::new(test_pool().await);
        store
            .create_if_absent(record("a.jpg", "image/jpeg", 300, 3))
            .await
            .unwrap();
        store
            .create_if_absent(record("b.png", "image/png", 100, 2))
            .await
            .unwrap();
        store
            .create_if_absent(record("c.pdf", "application/pdf", 200, 1))
            .await
            .unwrap();

        // default: newest first
        let all = store.list(&ListQuery::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|r| r.identifier.as_str()).collect::<Vec<_>>(),
            vec!["c.pdf", "b.png", "a.jpg"]
        );

        // mime substring filter
        let images = store
            .list(&ListQuery {
                mime_type: Some("image".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(images.len(), 2);

        // free-text search over title
        let hits = store
            .list(&ListQuery {
                search: Some("title-b".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identifier, "b.png");

        // explicit size ascending
        let by_size = store
            .list(&ListQuery {
                sort_by: Some(SortField::Size),
                sort: Some(SortOrder::Asc),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            by_size.iter().map(|r| r.size_bytes).collect::<Vec<_>>(),
            vec![100, 200, 300]
        );

        // limit/offset pagination
        let page = store
            .list(&ListQuery {
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].identifier, "b.png");
    }
}
