pub mod draft;
pub mod settings;
pub mod storage;

pub use draft::{DraftRecord, DraftStore, FlushOutcome};
pub use settings::EditorSettings;
pub use storage::{DraftStorage, FileStorage, MemoryStorage};
