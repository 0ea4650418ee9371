use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};

use crate::error::{MemoryError, Result};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub fn build_pool(database_url: &str, pool_size: u32) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .map_err(|e| MemoryError::storage("failed to build connection pool", e))
}
