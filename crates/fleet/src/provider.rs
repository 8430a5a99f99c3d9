//! Provider seams used by the orchestrator.
//!
//! The HTTP clients implement these directly; tests substitute fakes.

use async_trait::async_trait;
use common::{DetroParams, Direction, Error, VehiclePosition};
use detro_client::DetroClient;
use rio_client::{RioClient, RioRecord};

#[async_trait]
pub trait DetroSource: Send + Sync + 'static {
    /// Positions for one line in one direction, tagged with that direction.
    async fn fetch_direction(
        &self,
        line_id: &str,
        params: &DetroParams,
        direction: Direction,
    ) -> Result<Vec<VehiclePosition>, Error>;
}

#[async_trait]
pub trait RioSource: Send + Sync + 'static {
    /// Records for the given lines, from one combined request.
    async fn fetch_lines(&self, lines: &[String]) -> Result<Vec<RioRecord>, Error>;

    /// The unfiltered all-lines feed.
    async fn fetch_all(&self) -> Result<Vec<RioRecord>, Error>;
}

#[async_trait]
impl DetroSource for DetroClient {
    async fn fetch_direction(
        &self,
        line_id: &str,
        params: &DetroParams,
        direction: Direction,
    ) -> Result<Vec<VehiclePosition>, Error> {
        DetroClient::fetch_direction(self, line_id, params, direction).await
    }
}

#[async_trait]
impl RioSource for RioClient {
    async fn fetch_lines(&self, lines: &[String]) -> Result<Vec<RioRecord>, Error> {
        Ok(RioClient::fetch_lines(self, lines).await?.records)
    }

    async fn fetch_all(&self) -> Result<Vec<RioRecord>, Error> {
        Ok(RioClient::fetch_all(self).await?.records)
    }
}
