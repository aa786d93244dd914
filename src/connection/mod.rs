mod backoff_strategy;
mod guard;
mod manager;
mod stats;

pub use backoff_strategy::BackoffStrategy;
pub use guard::ConnectionGuard;
pub use manager::Manager as ConnectionManager;
pub use stats::ClientStats;
pub use stats::ConnectionStats;
pub use stats::IpStats;

#[cfg(test)]
mod tests {
    use tokio::time::sleep;

    use crate::config::{BackoffConfig, ConnectionConfig};
    use crate::{ConnectionError, RelayError};

    use super::*;
    use std::{
        net::{IpAddr, Ipv4Addr, SocketAddr},
        sync::Arc,
        time::Duration,
    };

    #[tokio::test]
    async fn test_connection_limits() {
        let config = ConnectionConfig {
            max_connections: 2,
            per_ip_limits: Some(1),
            idle_timeout: Duration::from_secs(60),
            error_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
            backoff: BackoffConfig::default(),
        };

        let manager = Arc::new(ConnectionManager::new(config));
        let addr1 = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1234);

        let conn1 = manager.accept_connection(addr1).await;
        assert!(conn1.is_ok(), "First connection should succeed");

        let conn2 = manager.accept_connection(addr1).await;
        match conn2 {
            Err(RelayError::Connection(ConnectionError::LimitExceeded(msg))) => {
                assert!(
                    msg.contains("127.0.0.1:1234"),
                    "Wrong IP in error message: {}",
                    msg
                );
            }
            other => panic!("Expected LimitExceeded error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_stats_after_limit() {
        let config = ConnectionConfig {
            max_connections: 1,
            per_ip_limits: Some(1),
            ..Default::default()
        };

        let manager = Arc::new(ConnectionManager::new(config));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1234);

        let conn = manager.accept_connection(addr).await.unwrap();
        let _err = manager.accept_connection(addr).await.unwrap_err();

        let stats = manager.get_stats().await.unwrap();
        assert_eq!(
            stats.active_connections, 1,
            "Should have one active connection"
        );
        assert_eq!(
            stats.total_connections, 1,
            "Should have one total connection"
        );

        drop(conn);
    }

    #[tokio::test]
    async fn test_idle_connection_cleanup() {
        let config = ConnectionConfig {
            idle_timeout: Duration::from_millis(100),
            ..Default::default()
        };

        let manager = Arc::new(ConnectionManager::new(config));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1234);

        let _conn = manager.accept_connection(addr).await.unwrap();

        let stats = manager.get_stats().await.unwrap();
        assert_eq!(stats.active_connections, 1);

        sleep(Duration::from_millis(200)).await;

        assert!(manager.cleanup_idle_connections().await.is_ok());

        let stats = manager.get_stats().await.unwrap();
        assert_eq!(stats.active_connections, 0);
    }

    #[tokio::test]
    async fn test_connection_guard_cleanup() {
        let config = ConnectionConfig::default();
        let manager = Arc::new(ConnectionManager::new(config));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1234);

        {
            let guard = manager.accept_connection(addr).await.unwrap();
            let stats = manager.get_stats().await.unwrap();
            assert_eq!(stats.active_connections, 1);

            drop(guard);
        }

        sleep(Duration::from_millis(50)).await;

        let stats = manager.get_stats().await.unwrap();
        assert_eq!(stats.active_connections, 0);
    }

    #[tokio::test]
    async fn test_backoff_strategy() {
        let config = BackoffConfig {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_retries: 3,
        };

        let mut strategy = BackoffStrategy::new(config);

        assert_eq!(strategy.next_backoff().unwrap().as_millis(), 100);
        assert_eq!(strategy.next_backoff().unwrap().as_millis(), 200);
        assert_eq!(strategy.next_backoff().unwrap().as_millis(), 400);

        assert!(strategy.next_backoff().is_none());

        strategy.reset();
        assert_eq!(strategy.next_backoff().unwrap().as_millis(), 100);
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let config = ConnectionConfig::default();
        let manager = Arc::new(ConnectionManager::new(config));
        let addr = "127.0.0.1:8080".parse().unwrap();

        let guard = manager.accept_connection(addr).await.unwrap();
        assert_eq!(manager.connection_count().await, 1);

        let stats = manager.get_stats().await.unwrap();
        assert_eq!(stats.active_connections, 1);

        drop(guard);
        sleep(Duration::from_millis(100)).await;
    }
}
