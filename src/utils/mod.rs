pub mod address_validator;
pub mod encoding;

pub use address_validator::AddressValidator;
