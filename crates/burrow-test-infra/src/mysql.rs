use crate::{InfraError, Result, CONNECT_ATTEMPTS, CONNECT_BACKOFF};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};

const DATABASE: &str = "burrow";
const USER: &str = "burrow";
const PASSWORD: &str = "burrow";

/// A throwaway MySQL 8.4 server holding an empty `burrow` database.
pub struct MySqlServer {
    container: ContainerAsync<GenericImage>,
}

impl MySqlServer {
    pub async fn start() -> Result<Self> {
        let container = GenericImage::new("mysql", "8.4")
            .with_exposed_port(3306_u16.tcp())
            .with_wait_for(WaitFor::message_on_stderr("ready for connections"))
            .with_env_var("MYSQL_DATABASE", DATABASE)
            .with_env_var("MYSQL_USER", USER)
            .with_env_var("MYSQL_PASSWORD", PASSWORD)
            .with_env_var("MYSQL_ROOT_PASSWORD", "root")
            .start()
            .await?;

        Ok(Self { container })
    }

    pub async fn database_url(&self) -> Result<String> {
        let host = self.container.get_host().await?;
        let port = self.container.get_host_port_ipv4(3306).await?;
        Ok(format!("mysql://{USER}:{PASSWORD}@{host}:{port}/{DATABASE}"))
    }

    /// Connects a small pool, retrying while the server finishes booting.
    ///
    /// MySQL logs "ready for connections" once for the init server and again
    /// for the real one, so the first attempts can be refused.
    pub async fn pool(&self) -> Result<MySqlPool> {
        let url = self.database_url().await?;
        let mut last_error = None;

        for _ in 0..CONNECT_ATTEMPTS {
            match MySqlPoolOptions::new().max_connections(5).connect(&url).await {
                Ok(pool) => return Ok(pool),
                Err(e) => {
                    last_error = Some(e);
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
            }
        }

        Err(InfraError::Connect {
            service: "mysql",
            attempts: CONNECT_ATTEMPTS,
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Connects and runs `ddl`, returning a pool over the prepared schema.
    pub async fn pool_with_schema(&self, ddl: &str) -> Result<MySqlPool> {
        let pool = self.pool().await?;
        sqlx::raw_sql(ddl)
            .execute(&pool)
            .await
            .map_err(|e| InfraError::Schema(e.to_string()))?;
        Ok(pool)
    }
}
