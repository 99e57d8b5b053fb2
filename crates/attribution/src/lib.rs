//! Attention attribution for set-level transformers.
//!
//! [`IntegratedGradients`] sweeps each attention head's weight and integrates
//! the gradient of the model output with respect to that layer's scores.
//! Results go to an [`AttributionStore`]; [`token_attribution`] then folds the
//! stored records into per-token totals and a dependency tree.

pub mod config;
pub mod error;
pub mod integrated;
pub mod render;
pub mod store;
pub mod token;
pub mod tree;

pub use config::AttributionConfig;
pub use error::{AttributionError, Result};
pub use integrated::IntegratedGradients;
pub use render::to_dot;
pub use store::{AttributionRecord, AttributionStore};
pub use token::{token_attribution, TokenAttribution};
pub use tree::{reconstruct, AttributionGraph, LayerEdges, Vertex, VertexState, CLASS_LABEL};
