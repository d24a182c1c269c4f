pub mod base;
pub mod encoded_key;
pub mod token;
pub mod view;
