//! Persisted entities of the auth module.

pub mod passport;
pub mod user;

pub use passport::{Gender, NewPassport, Passport, PassportProfile};
pub use user::User;
