use std::future::Future;

use anyhow::Result;
use hf_hub::api::tokio::Api;

use crate::{DeviceMap, ModelLike, ModelPaths};

pub trait Loader {
    type Model: ModelLike;

    /// Assembles a pipeline from the hub bundles plus the local overrides in `paths`.
    fn load(
        paths: &ModelPaths,
        api: Api,
        device_map: DeviceMap,
    ) -> impl Future<Output = Result<Self::Model>>
    where
        Self: Sized;
}
