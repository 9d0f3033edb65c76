// Remote sources: release metadata resolution and package byte streams.

pub mod http_source;
pub mod metadata;
pub mod release;
pub mod traits;
