pub mod constants;
pub mod error;
pub mod event;
pub mod serde_decimal;
pub mod ss58;
pub mod types;

pub use constants::*;
pub use error::LockdropError;
pub use event::*;
pub use types::*;
