mod dogu;
mod dogu_restart;

pub use dogu::*;
pub use dogu_restart::*;
