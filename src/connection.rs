use std::time::Duration;

use redis::aio::MultiplexedConnection;
use serde::Deserialize;
use url::Url;

use crate::error::LensError;

/// Which Redis server and logical database a request talks to.
///
/// Built fresh from every request body; nothing is cached between requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub db: i64,

    #[serde(default)]
    pub password: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

impl Default for ConnectionDescriptor {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db: 0,
            password: None,
        }
    }
}

impl ConnectionDescriptor {
    pub fn to_url(&self) -> Result<Url, LensError> {
        let invalid = || LensError::InvalidRequest(format!("Invalid Redis host '{}'", self.host));

        let mut url = Url::parse("redis://localhost").map_err(|_| invalid())?;
        url.set_host(Some(&self.host)).map_err(|_| invalid())?;
        url.set_port(Some(self.port)).map_err(|_| invalid())?;
        url.set_path(&format!("/{}", self.db));

        // An empty password means "no AUTH", same as omitting it
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password)).map_err(|_| invalid())?;
        }
        Ok(url)
    }

    /// URL with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        match self.to_url() {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(_) => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Open a dedicated connection and make sure the server answers PING.
    pub async fn open(&self, timeout: Duration) -> Result<MultiplexedConnection, LensError> {
        if self.db < 0 {
            return Err(LensError::InvalidRequest(format!(
                "Invalid database index {}",
                self.db
            )));
        }

        let url = self.to_url()?;
        let client = redis::Client::open(url.as_str())
            .map_err(|e| LensError::InvalidRequest(format!("Invalid Redis URL: {}", e)))?;

        let handshake = async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(conn)
        };

        // Bounds the PING as well as the connect
        let conn = match tokio::time::timeout(timeout, handshake).await {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => {
                tracing::error!(url = %self.redacted_url(), error = %e, "Redis connection error");
                return Err(LensError::Connection(e.to_string()));
            }
            Err(_) => {
                tracing::error!(url = %self.redacted_url(), "Timed out connecting to Redis");
                return Err(LensError::Connection(format!("timed out after {:?}", timeout)));
            }
        };

        tracing::debug!(url = %self.redacted_url(), "Connected to Redis");
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_body() {
        let desc: ConnectionDescriptor = serde_json::from_str("{}").unwrap();
        assert_eq!(desc, ConnectionDescriptor::default());
        assert_eq!(desc.to_url().unwrap().as_str(), "redis://localhost:6379/0");
    }

    #[test]
    fn test_url_with_password_and_db() {
        let desc = ConnectionDescriptor {
            host: "10.0.0.5".to_string(),
            port: 6380,
            db: 3,
            password: Some("s3cret".to_string()),
        };
        assert_eq!(desc.to_url().unwrap().as_str(), "redis://:s3cret@10.0.0.5:6380/3");
        assert_eq!(desc.redacted_url(), "redis://:***@10.0.0.5:6380/3");
    }

    #[test]
    fn test_password_is_percent_encoded() {
        let desc = ConnectionDescriptor {
            password: Some("p@ss/word".to_string()),
            ..Default::default()
        };
        let url = desc.to_url().unwrap();
        assert_eq!(url.password(), Some("p%40ss%2Fword"));
        assert_eq!(url.host_str(), Some("localhost"));
    }

    #[test]
    fn test_empty_password_is_ignored() {
        let desc = ConnectionDescriptor {
            password: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(desc.to_url().unwrap().password(), None);
    }

    #[tokio::test]
    async fn test_negative_db_rejected() {
        let desc = ConnectionDescriptor {
            db: -1,
            ..Default::default()
        };
        let err = desc.open(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, LensError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out_with_precise_message() {
        // Accepts the TCP connection but never writes a reply
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let holder = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let desc = ConnectionDescriptor {
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        };
        let err = desc.open(Duration::from_millis(150)).await.unwrap_err();
        match err {
            LensError::Connection(msg) => assert_eq!(msg, "timed out after 150ms"),
            other => panic!("expected connection error, got {other:?}"),
        }
        holder.abort();
    }
}
