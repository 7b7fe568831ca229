pub mod authenticators;
pub mod health;
