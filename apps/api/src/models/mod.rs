pub mod client_profile;
pub mod order;
pub mod referral;
pub mod subscription;
pub mod user;
