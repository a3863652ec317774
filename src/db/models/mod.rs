pub mod subscription;
pub mod user;

pub use self::subscription::*;
pub use self::user::*;
