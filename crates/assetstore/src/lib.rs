//! Asset store for meshforge.
//!
//! Turns whatever a remote pipeline hands back (raw bytes, data URIs, file
//! references, structured JSON) into a uniquely named file directly under a
//! single root directory, addressable as `asset://{type}/{filename}` or
//! `asset://{filename}`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use assetstore::{AssetPayload, AssetStore};
//!
//! # async fn demo() -> Result<(), assetstore::PersistenceError> {
//! let store = AssetStore::open("/tmp/meshforge-assets")?;
//!
//! let stored = store
//!     .persist(AssetPayload::Text("{}".into()), "debug", "json", "trellis")
//!     .await?;
//! println!("{} -> {}", stored.record.resource_uri, stored.content_hash);
//!
//! for record in store.list(Some("debug")).await? {
//!     println!("{}", record.id);
//! }
//!
//! let (_record, bytes) = store.read(&stored.record.resource_uri).await?;
//! assert_eq!(bytes, b"{}");
//! # Ok(())
//! # }
//! ```
//!
//! # Layout
//!
//! ```text
//! {root}/
//! ├── 3d_model_hunyuan3d_1718000000000_9f2c4e1ab0d37c55.glb
//! ├── preview_hunyuan3d_1718000000000_0b1d2e3f4a5b6c7d.glb
//! └── image_flux_1717999990000_5e6f7a8b9c0d1e2f.webp
//! ```
//!
//! The filename carries everything `list` needs (type, origin, creation
//! time), so there is no sidecar metadata.

pub mod error;
pub mod fetch;
pub mod naming;
pub mod payload;
pub mod store;
pub mod uri;

pub use error::PersistenceError;
pub use fetch::{FetchError, HttpFetcher, RemoteFetcher};
pub use naming::{mime_for_extension, ParsedName, KNOWN_TYPES};
pub use payload::AssetPayload;
pub use store::{AssetRecord, AssetStore, StoredAsset};
pub use uri::AssetUri;
