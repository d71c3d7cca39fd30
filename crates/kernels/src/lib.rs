//! Dense numeric primitives used by the kvforge software backend.

pub mod attention;
pub mod layernorm;
pub mod precision;
pub mod utils;

pub use attention::*;
pub use layernorm::*;
pub use precision::*;
pub use utils::*;
