pub mod local_store;
pub mod saved;

pub use local_store::LocalStore;
pub use saved::{SavedImages, StoredImage, SAVED_IMAGES_KEY};
