//! Customer-scoped clients.

pub mod addresses;

pub use addresses::{Address, AddressBook, AddressDraft, City, Country, State};
