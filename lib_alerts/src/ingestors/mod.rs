//! # Feed Ingestors Module
//!
//! The "front door" for every external disaster feed. Each submodule owns the
//! wire format of one feed and turns it into canonical [`DisasterEvent`]s.
//!
//! ## Purpose:
//! Feed-specific parsing stays behind one capability, [`FeedSource`], so the
//! poll scheduler never branches on the feed it is driving. The concrete feeds
//! form a closed set of [`SourceAdapter`] variants; adding a feed means adding
//! a variant, not touching the scheduler.
//!
//! ## Contained Modules:
//! - **`usgs`**: USGS earthquake GeoJSON summary feed.
//! - **`gdacs`**: GDACS multi-hazard RSS feed.
//!
//! A malformed item is skipped with a warning and the rest of the batch is
//! kept. Only a failed fetch or an undecodable document fails the poll.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::configs::SourceConfig;
use crate::models::{DisasterEvent, SourceKind};
use crate::retrieve::{ApiClient, FetchError};

/// The GDACS RSS adapter.
pub mod gdacs;
/// The USGS GeoJSON adapter.
pub mod usgs;

pub use gdacs::{parse_gdacs_feed, GdacsAdapter};
pub use usgs::{parse_usgs_feed, UsgsAdapter};

/// Why a single poll of a feed failed.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Network failure, timeout or non-success status.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The document as a whole could not be decoded.
    #[error("failed to decode {feed} feed: {reason}")]
    Decode {
        /// Feed that produced the document.
        feed: SourceKind,
        /// Parser message.
        reason: String,
    },
}

/// Fetch-and-normalize capability shared by every feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Which feed this is.
    fn kind(&self) -> SourceKind;

    /// Name used in logs.
    fn name(&self) -> &str {
        self.kind().prefix()
    }

    /// Fetches the feed once and returns its records in feed order.
    async fn fetch(&self) -> Result<Vec<DisasterEvent>, IngestError>;
}

/// Closed set of concrete feeds.
pub enum SourceAdapter {
    /// USGS earthquakes.
    Usgs(UsgsAdapter),
    /// GDACS alerts.
    Gdacs(GdacsAdapter),
}

impl SourceAdapter {
    /// Builds the adapter described by `config`, sharing `client`.
    ///
    /// Returns `None` for kinds that have no network feed (`manual`).
    pub fn from_config(config: &SourceConfig, client: ApiClient, url: Url) -> Option<Self> {
        match config.kind {
            SourceKind::Usgs => Some(SourceAdapter::Usgs(UsgsAdapter::new(client, url))),
            SourceKind::Gdacs => Some(SourceAdapter::Gdacs(GdacsAdapter::new(client, url))),
            SourceKind::Manual => None,
        }
    }
}

#[async_trait]
impl FeedSource for SourceAdapter {
    fn kind(&self) -> SourceKind {
        match self {
            SourceAdapter::Usgs(_) => SourceKind::Usgs,
            SourceAdapter::Gdacs(_) => SourceKind::Gdacs,
        }
    }

    async fn fetch(&self) -> Result<Vec<DisasterEvent>, IngestError> {
        match self {
            SourceAdapter::Usgs(adapter) => adapter.fetch().await,
            SourceAdapter::Gdacs(adapter) => adapter.fetch().await,
        }
    }
}
