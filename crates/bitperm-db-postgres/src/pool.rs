//! Pool construction for the permission store.

use std::str::FromStr;
use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgConnectOptions, PgPool, Postgres};
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::Result;

/// Pool sizing and timeouts derived from `config`.
pub(crate) fn pool_options(config: &PostgresConfig) -> PoolOptions<Postgres> {
    let mut options = PoolOptions::<Postgres>::new()
        .max_connections(config.pool_size)
        .min_connections(config.effective_min_connections())
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms));

    if let Some(idle_timeout) = config.idle_timeout_ms {
        options = options.idle_timeout(Duration::from_millis(idle_timeout));
    }
    options
}

/// Opens a pool tagged with the configured `application_name`.
#[instrument(skip(config), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    info!(
        pool_size = config.pool_size,
        min_connections = config.effective_min_connections(),
        application_name = %config.application_name,
        "opening permission store pool"
    );

    let connect = PgConnectOptions::from_str(&config.url)?.application_name(&config.application_name);
    let pool = pool_options(config).connect_with(connect).await?;
    debug!("permission store pool ready");

    Ok(pool)
}

/// Replaces the password of a connection URL with `****`.
pub(crate) fn mask_password(url: &str) -> String {
    let scheme_end = url.find("://").map_or(0, |p| p + 3);
    let Some(at) = url[scheme_end..].find('@').map(|p| p + scheme_end) else {
        return url.to_string();
    };
    match url[scheme_end..at].find(':') {
        Some(colon) => format!("{}:****{}", &url[..scheme_end + colon], &url[at..]),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://perm:secret@db:5432/bitperm"),
            "postgres://perm:****@db:5432/bitperm"
        );
        assert_eq!(
            mask_password("postgres://perm@db/bitperm"),
            "postgres://perm@db/bitperm"
        );
        assert_eq!(
            mask_password("postgres://localhost/bitperm"),
            "postgres://localhost/bitperm"
        );
    }

    #[test]
    fn test_pool_options_follow_config() {
        let config = PostgresConfig::new("postgres://db/perm")
            .with_pool_size(3)
            .with_min_connections(5)
            .with_connect_timeout_ms(750);
        let options = pool_options(&config);

        assert_eq!(options.get_max_connections(), 3);
        assert_eq!(options.get_min_connections(), 3);
        assert_eq!(options.get_acquire_timeout(), Duration::from_millis(750));
    }
}
