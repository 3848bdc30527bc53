//! Ingestion pipeline services and external integrations

pub mod catch_up;
pub mod classification;
pub mod content_store;
pub mod dedup_cache;
pub mod entity_resolver;
pub mod ingest;
pub mod logging;
pub mod material_linker;
pub mod orchestrator;
pub mod path_metadata;
pub mod queue;
pub mod rate_limiter;
pub mod session_registry;
pub mod supabase_storage;
pub mod text_utils;
pub mod watcher;

pub use catch_up::{CatchUpReport, CatchUpScanner};
pub use content_store::{BlobStore, ContentStore, MemoryBlobStore, PutOutcome, StoredContent};
pub use dedup_cache::{DedupCache, TtlDedupCache};
pub use entity_resolver::{EntityResolver, Resolution, TitleResolution};
pub use ingest::{FileIngestor, FileOutcome, ProcessReport};
pub use material_linker::{LinkOutcome, LinkPlan, MaterialLinker, Namespace};
pub use orchestrator::{DrainSummary, Orchestrator, OrchestratorConfig};
pub use path_metadata::{DateSource, ParsedMetadata, WatchedFile};
pub use queue::{CatchUpTarget, IngestQueue, WorkItem, WorkReason};
pub use rate_limiter::{RateLimitConfig, RetryConfig};
pub use session_registry::{RollbackOutcome, SessionHandle, SessionRegistry};
pub use supabase_storage::StorageClient;
pub use watcher::RootWatcher;
