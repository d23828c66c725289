pub mod postgres;

pub use postgres::PostgresDriver;

use crate::DatabaseDriver;
use crate::connection::ConnectionDescriptor;
use crate::core::{ConnectionSide, ForgeConfig, ForgeError};

/// Connects to the database behind `descriptor`; failures are labeled with `side`.
pub async fn create_driver(
    descriptor: &ConnectionDescriptor,
    side: ConnectionSide,
    config: &ForgeConfig,
) -> Result<Box<dyn DatabaseDriver>, ForgeError> {
    let driver = PostgresDriver::connect(descriptor, side, config).await?;
    Ok(Box::new(driver))
}
