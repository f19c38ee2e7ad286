pub mod analysis;
pub mod case;
pub mod chat;
pub mod finding;

pub use analysis::*;
pub use case::*;
pub use chat::*;
pub use finding::*;
