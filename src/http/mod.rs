//! HTTP transport for xsrfscan

pub mod client;
pub mod fetcher;
pub use client::HttpClient;
pub use fetcher::{
    CookieLedger, FetchRequest, FetchResponse, Fetcher, PacedFetcher, SessionTracker, SetCookie,
};
