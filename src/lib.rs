pub mod batch;
pub mod confusion;
pub mod display;
pub mod error;
pub mod pca;
pub mod prepare;
pub mod rebin;
pub mod svd;
pub mod synth;
mod utils;

pub use batch::{Batch, BatchStore, Channel, LoadOptions, SliceBounds};
pub use error::{PcaExpError, Result};
pub use pca::{PcaEngine, PcaEngineBuilder, PcaResult, ResultHandle};
pub use prepare::{DataPreparer, DatasetHandle, PrepareOptions, PreparedDataset};
pub use rebin::{Rebinner, RebinnerBuilder, StoppingRule};
pub use utils::nearest_index;
