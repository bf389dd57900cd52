//! Client configuration and declarative resource file loading.

mod batch;
mod settings;

pub use batch::{BatchParser, ResourceBatch};
pub use settings::{load_dotenv, Settings};
