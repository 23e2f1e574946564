use crate::{InfraError, Result, CONNECT_ATTEMPTS, CONNECT_BACKOFF};
use redis::aio::MultiplexedConnection;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

/// A throwaway standalone Redis server.
pub struct RedisServer {
    container: ContainerAsync<GenericImage>,
}

impl RedisServer {
    pub async fn start() -> Result<Self> {
        let container = GenericImage::new("redis", "8.6.0")
            .with_exposed_port(6379_u16.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .start()
            .await?;
        Ok(Self { container })
    }

    pub async fn redis_url(&self) -> Result<String> {
        let host = match self.container.get_host().await?.to_string().as_str() {
            "localhost" => "127.0.0.1".to_string(),
            other => other.to_string(),
        };
        let port = self.container.get_host_port_ipv4(6379).await?;
        Ok(format!("redis://{host}:{port}"))
    }

    /// Opens a multiplexed connection, retrying until the server accepts it.
    pub async fn connection(&self) -> Result<MultiplexedConnection> {
        let url = self.redis_url().await?;
        let mut last_error = None;

        for _ in 0..CONNECT_ATTEMPTS {
            let attempt = match redis::Client::open(url.as_str()) {
                Ok(client) => client.get_multiplexed_async_connection().await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    last_error = Some(e);
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
            }
        }

        Err(InfraError::Connect {
            service: "redis",
            attempts: CONNECT_ATTEMPTS,
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}
