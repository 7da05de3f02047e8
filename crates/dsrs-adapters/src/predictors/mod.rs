pub mod pipeline;
pub mod predict;

pub use pipeline::*;
pub use predict::*;

use futures::future::join_all;

use crate::adapter::AdapterKind;
use crate::{Example, PredictError, Prediction, Settings};

#[allow(async_fn_in_trait)]
pub trait Predictor: Send + Sync {
    async fn forward(&self, inputs: &Example, settings: &Settings) -> Result<Prediction, PredictError> {
        self.forward_with(inputs, settings, None).await
    }

    /// Runs with a per-call adapter that beats both the program's and the
    /// global choice.
    async fn forward_with(
        &self,
        inputs: &Example,
        settings: &Settings,
        call_adapter: Option<&AdapterKind>,
    ) -> Result<Prediction, PredictError>;

    /// Runs every input independently and concurrently. Results come back in
    /// input order, one per input, so a single failure does not hide the rest.
    async fn batch(
        &self,
        inputs: &[Example],
        settings: &Settings,
    ) -> Vec<Result<Prediction, PredictError>> {
        let futures: Vec<_> = inputs
            .iter()
            .map(|input| self.forward(input, settings))
            .collect();
        join_all(futures).await
    }
}
