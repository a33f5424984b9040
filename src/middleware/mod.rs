mod user_auth;

pub use user_auth::{UserContext, user_auth};
