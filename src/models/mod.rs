// Crossview Models
// Data structures for the application

mod settings;
mod source;
mod pipeline;
mod multiview;
mod production;
mod layout;
mod workflow;

pub use settings::*;
pub use source::*;
pub use pipeline::*;
pub use multiview::*;
pub use production::*;
pub use layout::*;
pub use workflow::*;
