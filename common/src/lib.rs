pub mod address;
pub mod errors;
pub mod hashes;
pub mod keys;
pub mod model;
pub mod script;
pub mod token_payload;
pub mod tx;
