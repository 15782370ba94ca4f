//! Network access to the remote content service.
//!
//! This module provides:
//! - HTTP client bound to the configured host and API key
//! - Streaming downloads with percent progress
//! - The `RemoteContent` seam the engine fetches through
//! - A retry helper for callers (the engine never retries on its own)

mod client;
mod download;
mod remote;
mod retry;

pub use client::HttpClient;
pub use download::DownloadProgress;
pub use remote::{HttpRemoteContent, RemoteContent};
pub use retry::{retry_async, RetryConfig, RetryStats};
