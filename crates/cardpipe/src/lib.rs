//! Public facade crate for `cardpipe`.
//!
//! No IO or browser/completion-provider logic lives here: this re-exports the
//! backend-agnostic card types, request shapes, errors and traits from `cardpipe-core`.
//! Browser automation, synthesis and storage live in `cardpipe-local`.
//!
//! ```
//! use cardpipe::{AcquireRequest, KnowledgeCard};
//!
//! let req: AcquireRequest =
//!     serde_json::from_str(r#"{"keyword": "rust async", "type": "search"}"#).unwrap();
//! assert!(matches!(req, AcquireRequest::Search(ref s) if s.keyword == "rust async"));
//!
//! let card: KnowledgeCard =
//!     serde_json::from_str(r#"{"id": "c1", "source": "keyword:rust async"}"#).unwrap();
//! assert_eq!(card.keyword(), "rust async");
//! ```

pub use cardpipe_core::*;
