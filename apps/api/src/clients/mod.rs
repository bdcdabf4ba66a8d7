pub mod handlers;
pub mod profiles;
