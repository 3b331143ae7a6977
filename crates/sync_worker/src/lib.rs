#![allow(
    clippy::useless_format,
    clippy::type_complexity,
    clippy::too_many_arguments,
    clippy::derivable_impls
)]

pub mod domain;
pub mod shared;
pub mod system;
pub mod usecases;
