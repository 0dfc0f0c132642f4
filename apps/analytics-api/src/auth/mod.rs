pub mod api_key;
pub mod middleware;
pub mod tokens;
