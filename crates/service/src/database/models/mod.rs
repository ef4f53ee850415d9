mod activity;
mod android_host;
mod app_config;
mod asset;
mod enroll_secret;
mod enterprise;
mod user;

pub use activity::{Activity, ActivityType};
pub use android_host::{AndroidHost, NewAndroidHost};
pub use app_config::AppConfig;
pub use asset::{AssetError, AssetKey, AssetName, ConfigAsset};
pub use enroll_secret::EnrollSecret;
pub use enterprise::Enterprise;
pub use user::{Role, Session, UnknownRole, User};
