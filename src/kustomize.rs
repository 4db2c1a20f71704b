mod command;
mod service;
mod session;
mod util;

pub use command::*;
pub use service::*;
pub use session::*;
pub use util::*;
