pub mod attributable;
pub mod block;
pub mod config;
pub mod dnabert;
pub mod loss;
pub mod setbert;
pub mod stack;

pub use attributable::AttributableModel;
pub use block::TransformerBlock;
pub use config::{DnaBertConfig, SetBertConfig, TransformerConfig};
pub use dnabert::{DnaBertEncoder, DnaBertModel, DnaBertPretrainModel, DnaBertPretrainOutput};
pub use loss::{chamfer_distance, sorted_loss, SetLossKind};
pub use setbert::{SetBertModel, SetBertOutput, SetBertPretrainModel, SetBertPretrainOutput};
pub use stack::TransformerStack;
