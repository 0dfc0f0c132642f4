pub mod api_key;
pub mod event;
pub mod membership;
pub mod organization;
