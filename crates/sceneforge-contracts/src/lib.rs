pub mod errors;
pub mod events;
pub mod images;
pub mod messages;
pub mod request;
pub mod storage;
pub mod studio;

pub use errors::{StudioError, StudioResult};
