use sea_orm::sea_query;
use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement};

use prime_mesh_core::MeshResult;

pub fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}

pub fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

/// Runs a write and returns the number of affected rows.
pub async fn exec<C, S>(conn: &C, stmt: &S) -> MeshResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub async fn query_all<C, S>(conn: &C, stmt: &S) -> MeshResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub async fn query_one<C, S>(conn: &C, stmt: &S) -> MeshResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

/// Reads an integer column that may be typed as 32-bit on some backends.
pub fn read_i64(row: &QueryResult, column: impl sea_query::Iden) -> MeshResult<i64> {
    let name = col_name(column);
    match row.try_get::<i64>("", &name) {
        Ok(value) => Ok(value),
        Err(_) => Ok(i64::from(row.try_get::<i32>("", &name)?)),
    }
}

pub fn read_opt_i64(row: &QueryResult, column: impl sea_query::Iden) -> MeshResult<Option<i64>> {
    let name = col_name(column);
    match row.try_get::<Option<i64>>("", &name) {
        Ok(value) => Ok(value),
        Err(_) => Ok(row.try_get::<Option<i32>>("", &name)?.map(i64::from)),
    }
}
