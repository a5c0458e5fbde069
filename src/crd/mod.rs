mod lotus;

pub use lotus::*;
