pub mod credential;
pub mod did;
pub mod verification;
