use crate::backend::BackendClient;
use crate::types::VehicleRecord;
use failure::Error;
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};

/// Something that yields values of `T`, either on request (`pull`) or on
/// its own schedule (`on_push`). A source usually supports only one of the
/// two; the other falls back to a default that yields nothing.
pub trait Source<T: Send + 'static>: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn pull(&self) -> BoxFuture<'static, Result<T, Error>> {
        let message = format!("{} cannot be pulled", self.name());
        future::ready(Err(failure::err_msg(message))).boxed()
    }

    fn on_push(&self) -> BoxStream<'static, T> {
        stream::empty().boxed()
    }
}

impl Source<Vec<VehicleRecord>> for BackendClient {
    fn name(&self) -> &str {
        "GET /vehicles"
    }

    fn pull(&self) -> BoxFuture<'static, Result<Vec<VehicleRecord>, Error>> {
        let client = self.clone();
        async move { client.vehicles().await }.boxed()
    }
}
