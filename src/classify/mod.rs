mod backend;
mod backends;
mod ensemble;
mod result;

pub use backend::ClassifierBackend;
pub use backends::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;
pub use ensemble::ClassifierEnsemble;
pub use result::{Prediction, PredictionSet};
