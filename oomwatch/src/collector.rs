use async_trait::async_trait;
pub mod oom_table;

#[async_trait]
pub trait Collector: Send + Sync {
    // Runs until shutdown is requested. Spawn it as its own task.
    async fn run(self);

    fn name(&self) -> String;
}
