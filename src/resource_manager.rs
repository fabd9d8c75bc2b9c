//! Resource management

use crate::error::EpidataError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] bounds the database connections used by
/// concurrent requests. Resource management is performed using a Tokio Semaphore.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for database connections.
    connections: Option<Semaphore>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(connection_limit: Option<usize>) -> Self {
        Self {
            connections: connection_limit.map(Semaphore::new),
        }
    }

    /// Acquire a database connection resource.
    pub async fn connection(&self) -> Result<Option<SemaphorePermit>, EpidataError> {
        optional_acquire(&self.connections, 1).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, EpidataError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::TryAcquireError;

    #[tokio::test]
    async fn no_resource_management() {
        let rm = ResourceManager::new(None);
        assert!(rm.connections.is_none());
        let c = rm.connection().await.unwrap();
        assert!(c.is_none());
    }

    #[tokio::test]
    async fn connection_limit() {
        let rm = ResourceManager::new(Some(1));
        let c = rm.connection().await.unwrap();
        assert!(c.is_some());
        // Check that there are no more connections (without blocking).
        assert_eq!(
            rm.connections.as_ref().unwrap().try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
        drop(c);
        assert!(rm.connections.as_ref().unwrap().try_acquire().is_ok());
    }

    #[tokio::test]
    async fn closed_semaphore() {
        let rm = ResourceManager::new(Some(1));
        rm.connections.as_ref().unwrap().close();
        assert!(matches!(
            rm.connection().await,
            Err(EpidataError::SemaphoreAcquireError(_))
        ));
    }
}
