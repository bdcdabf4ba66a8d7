pub mod handlers;
pub mod lifecycle;
pub mod paypal;
pub mod plans;
pub mod resolver;
