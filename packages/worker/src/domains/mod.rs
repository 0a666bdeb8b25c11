// Domain layers - business logic on top of the kernel

pub mod companies;
pub mod extraction;
pub mod filter;
pub mod intake;
pub mod listings;
pub mod processors;
pub mod sources;
pub mod views;
