//! starindex-core: streaming ingest of star system records.
//!
//! # Architecture
//!
//! ```text
//! gzip byte stream
//!       │
//!       ▼
//! StreamDecoder        (brace-depth scanner, one JSON object per item)
//!       │  bounded mpsc queue
//!       ▼
//! normalize()          (RawRecord + Catalogs → NormalizedRecord)
//!       │
//!       ▼
//! BatchWriter          (fixed-size transactional upserts)
//!       │
//!       ▼
//! SystemStore backend  (memory / SQLite / MySQL, see starindex-storage)
//! ```
//!
//! The live path ([`live::LiveIngest`]) feeds individual message-bus events
//! through the same normalize → append contract.

pub mod catalog;
pub mod config;
pub mod decoder;
pub mod error;
pub mod input;
pub mod live;
pub mod normalizer;
pub mod pipeline;
pub mod types;
pub mod writer;

pub use catalog::{Catalog, CatalogKind, CatalogResolver, CatalogSource, Catalogs};
pub use config::{DatabaseConfig, IngestConfig, IngestConfigBuilder};
pub use decoder::{DecoderStats, StreamDecoder};
pub use error::IngestError;
pub use live::{EventSource, EventStream, LiveIngest, LiveReport, LiveSink};
pub use normalizer::normalize;
pub use pipeline::{collect_allegiances, PipelineDriver, RunReport};
pub use types::{Coords, NormalizedRecord, RawRecord};
pub use writer::{BatchWriter, SystemStore};
