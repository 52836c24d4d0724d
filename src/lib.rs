//! # pagefetch
//!
//! Adaptive page fetcher for hostile, anti-bot-protected sites. Fetches go
//! over plain HTTP while responses stay trustworthy and escalate, per
//! domain, to a headless-browser rendering path once they stop looking
//! real, with bounded retries, exponential backoff, and per-domain failure
//! history kept for the life of the engine.
//!
//! ## How a fetch is decided
//!
//! Every domain resolves to a [`FetchPolicy`]:
//!
//! | Strategy | Behavior |
//! |----------|----------|
//! | `REQUESTS_ONLY` | Plain HTTP, never renders |
//! | `JS_IF_SHELL` | Plain HTTP until enough responses look like shell/challenge pages, then renders for the rest of the run |
//! | `JS_REQUIRED` | A single 403 flips the domain to rendering immediately |
//!
//! The [`BlockDetector`] decides what "looks like a shell" means: block-page
//! titles, CDN challenge markers, required content markers, and minimum
//! body length, all policy-tunable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagefetch::{EngineConfig, FetchEngine, PolicyStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = FetchEngine::new(EngineConfig::default(), PolicyStore::default())?;
//!
//!     let result = engine.get("https://example.com/listing?page=2").await?;
//!     println!("{} bytes in {}ms", result.body_text.len(), result.elapsed_ms);
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Single fetch
//! pagefetch fetch --url https://example.com --output page.html
//!
//! # Batch with polite pacing
//! pagefetch batch --input urls.txt --output pages/
//! ```
//!
//! The engine is sequential by design: one fetch in flight at a time, with
//! a randomized polite delay applied by the caller between fetches.
//! Concurrent hammering of a protected site defeats the entire strategy.

/// Global configuration and retry/backoff policy
pub mod config;

/// Error types and retryability classification
pub mod error;

/// Per-domain fetch policies and their resolution
pub mod policy;

/// Block/challenge/shell response classification
pub mod detect;

/// Plain HTTP transport with browser-like headers
pub mod transport;

/// Headless-browser process and per-domain context lifecycle
pub mod browser;

/// Browser-rendered fetching
pub mod render;

/// Strategy engine orchestrating transports and per-domain state
pub mod engine;

/// Command-line interface implementation
pub mod cli;

/// Utility functions and helpers
pub mod utils;


pub use browser::*;
pub use cli::*;
pub use config::*;
pub use detect::*;
pub use engine::*;
pub use error::*;
pub use policy::*;
pub use render::*;
pub use transport::*;
pub use utils::*;
