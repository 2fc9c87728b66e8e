// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image sources: the datacenter-local store and the upstream registry
//!
//! Both expose the same read surface.  The local store additionally
//! supports importing an image (and its origin chain) from upstream, which
//! is how the image-prefetch procedure makes target images local.

use async_trait::async_trait;
use camino::Utf8Path;
use updateadm_common::error::UpstreamError;
use updateadm_types::Image;
use uuid::Uuid;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageFilter {
    pub name: Option<String>,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// `Err(UpstreamError::NotFound { .. })` when no such image exists.
    async fn get_image(&self, uuid: Uuid) -> Result<Image, UpstreamError>;

    async fn list_images(
        &self,
        filter: &ImageFilter,
    ) -> Result<Vec<Image>, UpstreamError>;

    /// Download the image's file to `path`.
    async fn get_image_file(
        &self,
        uuid: Uuid,
        path: &Utf8Path,
    ) -> Result<(), UpstreamError>;

    /// Import `uuid` (and any origin images it depends on) from the
    /// upstream registry, waiting until the image is usable locally.
    async fn import_remote_image(
        &self,
        uuid: Uuid,
    ) -> Result<Image, UpstreamError>;
}

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// `Err(UpstreamError::NotFound { .. })` when no such image exists.
    async fn get_image(&self, uuid: Uuid) -> Result<Image, UpstreamError>;

    async fn list_images(
        &self,
        filter: &ImageFilter,
    ) -> Result<Vec<Image>, UpstreamError>;

    async fn get_image_file(
        &self,
        uuid: Uuid,
        path: &Utf8Path,
    ) -> Result<(), UpstreamError>;
}
