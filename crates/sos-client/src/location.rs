//! Location sources.

use async_trait::async_trait;
use dispatch::Coordinates;

use crate::capabilities::LocationProvider;
use crate::errors::LocationError;

/// Reports a configured position, or `Unsupported` when none is known.
#[derive(Debug, Clone, Default)]
pub struct StaticLocation {
    coordinates: Option<Coordinates>,
}

impl StaticLocation {
    pub fn new(coordinates: Option<Coordinates>) -> Self {
        Self { coordinates }
    }
}

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        self.coordinates.ok_or(LocationError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_location() {
        let here = Coordinates::new(51.5, -0.12);
        assert_eq!(StaticLocation::new(Some(here)).locate().await, Ok(here));
        assert_eq!(
            StaticLocation::default().locate().await,
            Err(LocationError::Unsupported)
        );
    }
}
