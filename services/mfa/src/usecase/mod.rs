pub mod authenticator;
pub mod locks;
