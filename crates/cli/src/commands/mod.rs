pub mod create;
pub mod inspect;
pub mod lock;
pub mod remove;
pub mod set;
pub mod touch;
