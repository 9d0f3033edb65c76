use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use super::release::ReleaseDescriptor;
use crate::error::Result;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// An opened package download: the advertised length plus the body stream.
pub struct PackageStream {
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// Where release metadata comes from.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    fn name(&self) -> &str;
    async fn resolve_latest(&self) -> Result<ReleaseDescriptor>;
}

/// Where package bytes come from.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn open(&self, url: &str) -> Result<PackageStream>;
}
