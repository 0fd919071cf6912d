pub mod fetcher;

pub use fetcher::{ReqwestFetcher, parse_retry_after};
