pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{StubModel, STUB_LABELS};

#[cfg(feature = "backend-tract")]
pub use tract::TractModel;
