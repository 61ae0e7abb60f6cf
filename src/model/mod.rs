pub mod month;
pub mod observation;
pub mod progress;

pub use month::*;
pub use observation::*;
pub use progress::*;
