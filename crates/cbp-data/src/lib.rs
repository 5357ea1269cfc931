pub mod loaders;
pub mod storage;
pub mod compare;

pub use loaders::*;
pub use storage::*;
pub use compare::*;
