pub mod address_book;
pub mod event;
pub mod hash;
pub mod round;
pub mod window;

pub use address_book::*;
pub use event::*;
pub use hash::*;
pub use round::*;
pub use window::*;
