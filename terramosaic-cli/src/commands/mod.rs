pub mod bounds;
pub mod combine;
pub mod inspect;
pub mod list;
pub mod locate;
pub mod satellite;
pub mod weather;
