mod is_newer;
mod unwrapper;

pub use is_newer::*;
pub use unwrapper::*;
