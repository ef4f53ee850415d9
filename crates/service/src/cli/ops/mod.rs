mod add_enroll_secret;
mod add_user;
mod serve;

pub use add_enroll_secret::AddEnrollSecret;
pub use add_user::AddUser;
pub use serve::Serve;
