use async_trait::async_trait;
use tracing::info;

use heroes_core::{EntityId, Hero};
use heroes_infra::{CrudRepository, EntitySession, JobContext, JobDescriptor, JobHandler, Store, Worker};

pub const PRINT_HERO: &str = "print_hero";

/// `print_hero(hero_id)`: load the active hero in the job's session and log
/// its name. A missing hero fails the job.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintHero;

#[async_trait]
impl<T> JobHandler<T> for PrintHero
where
    T: EntitySession<Hero>,
{
    async fn run(&self, ctx: &JobContext, session: &mut T, job: &JobDescriptor) -> anyhow::Result<()> {
        let hero_id: EntityId = job.arg(0)?;
        let hero = CrudRepository::<Hero>::new()
            .get(session, hero_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("hero {hero_id} not found"))?;

        info!(hero_id = %hero_id, correlation_id = %ctx.correlation_id, "Hero: {}", hero.name);
        Ok(())
    }
}

/// Register every job this crate knows about.
pub fn register<S>(worker: &mut Worker<S>) -> &mut Worker<S>
where
    S: Store,
    S::Session: EntitySession<Hero>,
{
    worker.register(PRINT_HERO, PrintHero)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Map, json};

    use heroes_core::{Entity, HeroCreate};
    use heroes_infra::config::WorkerSettings;
    use heroes_infra::{CorrelationId, JobQueue, MemoryStore, unit_of_work};

    use super::*;

    fn worker(store: &MemoryStore) -> Worker<MemoryStore> {
        let mut worker = Worker::new(store.clone(), Arc::new(JobQueue::new()), WorkerSettings::default());
        register(&mut worker);
        worker
    }

    fn print_hero(id: serde_json::Value) -> JobDescriptor {
        JobDescriptor::new(PRINT_HERO, vec![id], Map::new(), CorrelationId::from("req-42"))
    }

    #[test]
    fn registers_print_hero() {
        let store = MemoryStore::new();
        assert_eq!(worker(&store).job_names(), vec![PRINT_HERO]);
    }

    #[tokio::test]
    async fn prints_an_existing_hero() {
        let store = MemoryStore::new();
        let hero = unit_of_work(&store, |mut session| async move {
            let outcome = CrudRepository::<Hero>::new()
                .create(&mut session, HeroCreate { name: "Superman".into(), ability_id: None })
                .await;
            (session, outcome)
        })
        .await
        .unwrap();

        let outcome = worker(&store).process(print_hero(json!(hero.id()))).await;
        assert!(outcome.success, "{:?}", outcome.error);
    }

    #[tokio::test]
    async fn missing_hero_fails_the_job() {
        let store = MemoryStore::new();
        let outcome = worker(&store).process(print_hero(json!(EntityId::new()))).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap_or_default().contains("not found"));
    }

    #[tokio::test]
    async fn malformed_argument_fails_the_job() {
        let store = MemoryStore::new();
        let outcome = worker(&store).process(print_hero(json!("not-a-uuid"))).await;
        assert!(!outcome.success);
    }
}
