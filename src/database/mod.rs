pub mod repositories;

pub use repositories::ScoreStateRepository;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};

/// The engine writes one large transactional batch per tick, so a
/// handful of connections is plenty.
const POOL_SIZE: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_ATTEMPTS: u32 = 4;

/// Open the scoring pool and prove it with a round trip.
///
/// A tick cannot commit without the database, so startup insists on
/// a working connection rather than handing back a lazy pool that
/// fails on the first save. The store may still be coming up when we
/// are (fresh deploys, restarts), hence a short linear backoff
/// before giving up.
pub async fn create_pool(database_url: &str) -> AppResult<PgPool> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        let connect = PgPoolOptions::new()
            .max_connections(POOL_SIZE)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await;

        let err = match connect {
            Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                Ok(_) => return Ok(pool),
                Err(e) => e,
            },
            Err(e) => e,
        };

        if attempt == CONNECT_ATTEMPTS {
            return Err(AppError::Database(format!(
                "Score store unreachable after {} attempt(s): {}",
                CONNECT_ATTEMPTS, err
            )));
        }
        let wait = Duration::from_secs(2 * attempt as u64);
        tracing::warn!(
            "Score store not ready ({}), attempt {}/{}, next try in {:?}",
            err,
            attempt,
            CONNECT_ATTEMPTS,
            wait
        );
        tokio::time::sleep(wait).await;
    }

    Err(AppError::Database(
        "Score store unreachable: no connection attempts were made".to_string(),
    ))
}
