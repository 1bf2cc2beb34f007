pub mod clients;
pub mod configs;
pub mod credentials;
pub mod dns;
pub mod networks;
