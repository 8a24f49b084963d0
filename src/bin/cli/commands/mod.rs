pub mod edit;
pub mod list;
pub mod new;
pub mod search;
pub mod serve;
pub mod show;
pub mod sync;
pub mod transfer;
