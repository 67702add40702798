pub mod facts;
pub mod league;
pub mod snapshot;
pub mod task;
pub mod text;

pub use facts::*;
pub use league::*;
pub use snapshot::*;
pub use task::*;
