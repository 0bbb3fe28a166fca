mod in_flight;

pub use self::in_flight::*;
