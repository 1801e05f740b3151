pub mod backend;
pub mod client;
pub mod feed;
pub mod session;
pub mod supabase;

pub use backend::Backend;
pub use client::{EngineOptions, SyncClient};
pub use session::RetryPolicy;
pub use supabase::SupabaseBackend;
