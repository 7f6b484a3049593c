//! PostgreSQL-backed `PostRepository` implementation using Diesel ORM.
//!
//! Also serves the store-side feed query used when a cached feed is empty
//! or unavailable: posts joined to the recipient's active follow edges.

use async_trait::async_trait;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use pagination::PageRequest;

use crate::domain::ports::{PostPersistenceError, PostRepository};
use crate::domain::{Post, PostContent, PostId, UserId};

use super::diesel_basic_error_mapping::{map_basic_diesel_error, map_basic_pool_error, sql_limit};
use super::models::{NewPostRow, PostRow};
use super::pool::{DbPool, PoolError};
use super::schema::{posts, user_follows};

/// Diesel-backed implementation of the `PostRepository` port.
#[derive(Clone)]
pub struct DieselPostRepository {
    pool: DbPool,
}

impl DieselPostRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> PostPersistenceError {
    map_basic_pool_error(error, PostPersistenceError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> PostPersistenceError {
    map_basic_diesel_error(
        error,
        PostPersistenceError::query,
        PostPersistenceError::connection,
    )
}

fn row_to_post(row: PostRow) -> Result<Post, PostPersistenceError> {
    let id = row.id;
    let invalid =
        move |err: String| PostPersistenceError::query(format!("stored post {id} is invalid: {err}"));
    Ok(Post {
        id: PostId::new(row.id).map_err(|err| invalid(err.to_string()))?,
        author_id: UserId::new(row.author_id).map_err(|err| invalid(err.to_string()))?,
        content: PostContent::new(&row.content).map_err(|err| invalid(err.to_string()))?,
        created_at: row.created_at,
    })
}

fn rows_to_posts(rows: Vec<PostRow>) -> Result<Vec<Post>, PostPersistenceError> {
    rows.into_iter().map(row_to_post).collect()
}

/// Posts after the request cursor in newest-first order. The caller adds
/// the selection predicate.
fn after_cursor<'a>(
    query: posts::BoxedQuery<'a, Pg>,
    request: &PageRequest,
) -> posts::BoxedQuery<'a, Pg> {
    let query = match request.cursor() {
        Some(cursor) => match cursor.tie_key() {
            Some(key) => query.filter(
                posts::created_at
                    .lt(cursor.score())
                    .or(posts::created_at.eq(cursor.score()).and(posts::id.gt(key))),
            ),
            None => query.filter(posts::created_at.lt(cursor.score())),
        },
        None => query,
    };
    query
        .order((posts::created_at.desc(), posts::id.asc()))
        .limit(sql_limit(request.limit()))
}

#[async_trait]
impl PostRepository for DieselPostRepository {
    async fn create(
        &self,
        author: UserId,
        content: &PostContent,
        created_at: i64,
    ) -> Result<Post, PostPersistenceError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: PostRow = diesel::insert_into(posts::table)
            .values(&NewPostRow {
                author_id: author.get(),
                content: content.as_ref(),
                created_at,
            })
            .returning(PostRow::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        row_to_post(row)
    }

    async fn find_by_ids(&self, ids: &[PostId]) -> Result<Vec<Post>, PostPersistenceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();

        let rows: Vec<PostRow> = posts::table
            .filter(posts::id.eq_any(&raw_ids))
            .select(PostRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows_to_posts(rows)
    }

    async fn list_by_author(
        &self,
        author: UserId,
        request: &PageRequest,
    ) -> Result<Vec<Post>, PostPersistenceError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let query = posts::table
            .filter(posts::author_id.eq(author.get()))
            .into_boxed();
        let rows: Vec<PostRow> = after_cursor(query, request)
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows_to_posts(rows)
    }

    async fn list_feed(
        &self,
        recipient: UserId,
        request: &PageRequest,
    ) -> Result<Vec<Post>, PostPersistenceError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let followed = user_follows::table
            .filter(user_follows::follower_id.eq(recipient.get()))
            .filter(user_follows::removed.eq(false))
            .select(user_follows::following_id);
        let query = posts::table
            .filter(posts::author_id.eq_any(followed))
            .into_boxed();
        let rows: Vec<PostRow> = after_cursor(query, request)
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows_to_posts(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;
    use pagination::Cursor;
    use rstest::rstest;

    #[rstest]
    fn feed_query_restricts_to_active_followings() {
        let followed = user_follows::table
            .filter(user_follows::follower_id.eq(1_i64))
            .filter(user_follows::removed.eq(false))
            .select(user_follows::following_id);
        let query = posts::table
            .filter(posts::author_id.eq_any(followed))
            .into_boxed();
        let request = PageRequest::new(Some(Cursor::after_item(300, 8)), 5).expect("valid");
        let sql = debug_query::<Pg, _>(&after_cursor(query, &request)).to_string();

        assert!(sql.contains(r#""posts"."author_id" = ANY(SELECT "user_follows"."following_id""#));
        assert!(sql.contains(r#"ORDER BY "posts"."created_at" DESC, "posts"."id" ASC"#));
    }

    #[rstest]
    fn rows_with_blank_content_are_rejected() {
        let error = row_to_post(PostRow {
            id: 8,
            author_id: 2,
            content: "   ".to_owned(),
            created_at: 300,
        })
        .expect_err("blank content");
        assert!(error.to_string().contains("stored post 8"));
    }
}
