use crate::Result;
use crate::models::FieldMap;
use async_trait::async_trait;

/// External evaluator: rates one interaction. Used to decide whether a logged record
/// is promoted to training data.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(
        &self,
        inputs: &FieldMap,
        outputs: &FieldMap,
        instructions: &[String],
    ) -> Result<f32>;

    fn name(&self) -> &'static str;
}
