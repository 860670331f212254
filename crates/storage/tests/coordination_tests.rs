//! 抢占、续约与停止流程的集成测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, sample_task, wait_until, TestDatabase};
use rcron_core::time::now_millis;
use rcron_core::{SchedulerStatus, StorageConfig, TaskEventType, TaskRepository};
use rcron_storage::{EventBus, Preempter, Refresher, Registry, ShutdownManager, Storage};
use tokio::time::timeout;

/// 直接组装协调组件，绕过门面以便逐步驱动
struct TestNode {
    registry: Arc<Registry>,
    refresher: Arc<Refresher>,
    preempter: Arc<Preempter>,
    events: tokio::sync::mpsc::Receiver<rcron_core::TaskEvent>,
    shutdown: ShutdownManager,
}

async fn test_node(db: &TestDatabase, config: StorageConfig) -> anyhow::Result<TestNode> {
    let tasks = db.task_repo();
    let registry = Arc::new(Registry::register(db.storage_repo()).await?);
    let shutdown = ShutdownManager::new();
    let (bus, events) = EventBus::new(config.event_channel_capacity);
    let refresher = Arc::new(Refresher::new(
        config.clone(),
        Arc::clone(&tasks),
        Arc::clone(&registry),
        bus.clone(),
        shutdown.clone(),
    ));
    let preempter = Arc::new(Preempter::new(
        config,
        tasks,
        Arc::clone(&registry),
        Arc::clone(&refresher),
        bus,
        shutdown.clone(),
    ));
    Ok(TestNode {
        registry,
        refresher,
        preempter,
        events,
        shutdown,
    })
}

/// S1：新建任务在数百毫秒内被抢占
#[tokio::test]
async fn test_fresh_task_preempted() -> anyhow::Result<()> {
    let db = TestDatabase::new().await?;
    let storage = Storage::register(db.task_repo(), db.storage_repo(), fast_config()).await?;
    let mut events = storage.take_events().await.expect("事件流应可取走");
    storage.start().await?;

    let task_id = storage.add(&sample_task("fresh")).await?;

    let created = timeout(Duration::from_secs(2), events.recv())
        .await?
        .expect("应收到新建事件");
    assert_eq!(created.event_type, TaskEventType::Created);

    let preempted = timeout(Duration::from_secs(2), events.recv())
        .await?
        .expect("应收到抢占事件");
    assert_eq!(preempted.event_type, TaskEventType::Preempted);
    assert_eq!(preempted.task_id(), task_id);
    assert_eq!(preempted.task.occupier_id, storage.storage_id());
    assert_eq!(preempted.task.epoch, 1);

    let row = db.get_task(task_id).await?;
    assert_eq!(row.scheduler_status, SchedulerStatus::Preempted);
    assert_eq!(row.occupier_id, storage.storage_id());
    assert_eq!(row.epoch, 1);
    assert_eq!(row.candidate_id, 0);

    assert_eq!(storage.payload(), 1);
    assert!(storage.owned_task_ids().await.contains(&task_id));

    // 负载持久化循环最终把内存值写入节点行
    let storage_id = storage.storage_id();
    assert!(
        wait_until(Duration::from_secs(2), || async {
            db.get_storage_payload(storage_id)
                .await
                .ok()
                .flatten()
                .map(|p| p == 1)
                .unwrap_or(false)
        })
        .await
    );

    storage.stop(Duration::from_secs(5)).await?;
    Ok(())
}

/// S2：租约过期的任务被新节点回收
#[tokio::test]
async fn test_stale_lease_reclaimed() -> anyhow::Result<()> {
    let db = TestDatabase::new().await?;
    // 阈值 = 3 * 1000ms，伪造 10 秒未续约的占有者
    let task_id = db
        .insert_task_row(SchedulerStatus::Preempted, 999, 0, 5, now_millis() - 10_000)
        .await?;

    let storage = Storage::register(db.task_repo(), db.storage_repo(), fast_config()).await?;
    let mut events = storage.take_events().await.expect("事件流应可取走");
    storage.start().await?;

    let preempted = timeout(Duration::from_secs(2), events.recv())
        .await?
        .expect("应收到抢占事件");
    assert_eq!(preempted.event_type, TaskEventType::Preempted);
    assert_eq!(preempted.task_id(), task_id);
    assert_eq!(preempted.task.epoch, 6);

    let row = db.get_task(task_id).await?;
    assert_eq!(row.occupier_id, storage.storage_id());
    assert!(row.epoch >= 6);

    storage.stop(Duration::from_secs(5)).await?;
    Ok(())
}

/// 租约未过期的占有不会被抢走
#[tokio::test]
async fn test_live_lease_not_preempted() -> anyhow::Result<()> {
    let db = TestDatabase::new().await?;
    let task_id = db
        .insert_task_row(SchedulerStatus::Preempted, 999, 0, 5, now_millis())
        .await?;

    let node = test_node(&db, fast_config()).await?;
    node.preempter.tick().await?;

    let row = db.get_task(task_id).await?;
    assert_eq!(row.occupier_id, 999);
    assert_eq!(row.epoch, 5);
    assert!(node.refresher.owned_ids().await.is_empty());

    node.shutdown.shutdown();
    Ok(())
}

/// S3：续约推进 epoch 与 update_time
#[tokio::test]
async fn test_refresh_advances_epoch() -> anyhow::Result<()> {
    let db = TestDatabase::new().await?;
    let mut config = fast_config();
    config.refresh_interval_ms = 100;

    let node = test_node(&db, config).await?;
    let storage_id = node.registry.storage_id();
    let inserted_at = now_millis();
    let task_id = db
        .insert_task_row(SchedulerStatus::Preempted, storage_id, 0, 1, inserted_at)
        .await?;

    node.registry.bump_payload(1);
    node.refresher.watch(db.get_task(task_id).await?).await;

    // 一个续约周期后 epoch 前进一步，此后继续推进
    assert!(
        wait_until(Duration::from_secs(2), || async {
            db.get_task(task_id).await.map(|t| t.epoch >= 2).unwrap_or(false)
        })
        .await
    );
    assert!(
        wait_until(Duration::from_secs(2), || async {
            db.get_task(task_id).await.map(|t| t.epoch >= 3).unwrap_or(false)
        })
        .await
    );

    let row = db.get_task(task_id).await?;
    assert!(row.update_time >= inserted_at);
    assert_eq!(row.occupier_id, storage_id);

    node.shutdown.shutdown();
    Ok(())
}

/// S4：连续续约失败后放弃任务
#[tokio::test]
async fn test_discard_after_refresh_exhaustion() -> anyhow::Result<()> {
    let db = TestDatabase::new().await?;
    let mut config = fast_config();
    config.refresh_interval_ms = 100;
    config.refresh_retry_interval_ms = 50;
    config.refresh_retry_max = 2;

    let mut node = test_node(&db, config).await?;
    let storage_id = node.registry.storage_id();
    let task_id = db
        .insert_task_row(SchedulerStatus::Preempted, storage_id, 0, 1, now_millis())
        .await?;

    node.registry.bump_payload(1);
    node.refresher.watch(db.get_task(task_id).await?).await;
    // 带外推高 epoch，之后所有续约 CAS 都落空
    db.bump_task_epoch(task_id, 99).await?;

    let discarded = timeout(Duration::from_secs(2), node.events.recv())
        .await?
        .expect("应收到放弃事件");
    assert_eq!(discarded.event_type, TaskEventType::Discarded);
    assert_eq!(discarded.task_id(), task_id);

    // 事件在数据库降级之后发出
    let row = db.get_task(task_id).await?;
    assert_eq!(row.scheduler_status, SchedulerStatus::Discarded);
    assert_eq!(row.occupier_id, 0);

    assert_eq!(node.registry.payload(), 0);
    assert!(node.refresher.owned_ids().await.is_empty());

    node.shutdown.shutdown();
    Ok(())
}

/// 租约被他人拿走时静默放弃，不发 Discarded 事件
#[tokio::test]
async fn test_lease_lost_abandons_silently() -> anyhow::Result<()> {
    let db = TestDatabase::new().await?;
    let mut config = fast_config();
    config.refresh_interval_ms = 100;

    let mut node = test_node(&db, config).await?;
    let storage_id = node.registry.storage_id();
    let task_id = db
        .insert_task_row(SchedulerStatus::Preempted, storage_id, 0, 1, now_millis())
        .await?;

    node.registry.bump_payload(1);
    node.refresher.watch(db.get_task(task_id).await?).await;

    // 模拟其他节点抢走租约
    sqlx::query("UPDATE tasks SET occupier_id = 777, epoch = 2 WHERE id = $1")
        .bind(task_id)
        .execute(&db.pool)
        .await?;

    assert!(
        wait_until(Duration::from_secs(2), || async {
            node.refresher.owned_ids().await.is_empty()
        })
        .await
    );
    assert_eq!(node.registry.payload(), 0);

    // 没有任何事件
    assert!(timeout(Duration::from_millis(300), node.events.recv())
        .await
        .is_err());

    // 行未被本节点改动
    let row = db.get_task(task_id).await?;
    assert_eq!(row.occupier_id, 777);

    node.shutdown.shutdown();
    Ok(())
}

/// 互斥：同一任务只会被一个节点认领
#[tokio::test]
async fn test_mutual_exclusion_on_claim() -> anyhow::Result<()> {
    let db = TestDatabase::new().await?;
    let task_id = db
        .insert_task_row(SchedulerStatus::Created, 0, 0, 0, now_millis())
        .await?;

    let node_a = test_node(&db, fast_config()).await?;
    let node_b = test_node(&db, fast_config()).await?;

    node_a.preempter.tick().await?;
    node_b.preempter.tick().await?;

    let row = db.get_task(task_id).await?;
    assert_eq!(row.occupier_id, node_a.registry.storage_id());
    assert_eq!(row.epoch, 1);

    // 失败方看到零行命中，占有集不相交
    let claimed = db
        .task_repo()
        .try_preempt(task_id, node_b.registry.storage_id(), 0, SchedulerStatus::Created)
        .await?;
    assert!(!claimed);

    let owned_a = node_a.refresher.owned_ids().await;
    let owned_b = node_b.refresher.owned_ids().await;
    assert!(owned_a.contains(&task_id));
    assert!(owned_b.is_empty());
    assert_eq!(node_a.registry.payload(), 1);
    assert_eq!(node_b.registry.payload(), 0);

    node_a.shutdown.shutdown();
    node_b.shutdown.shutdown();
    Ok(())
}

/// 事件顺序：Created → Preempted → 至多一次 Discarded
#[tokio::test]
async fn test_event_ordering_per_task() -> anyhow::Result<()> {
    let db = TestDatabase::new().await?;
    let mut config = fast_config();
    config.refresh_interval_ms = 100;
    config.refresh_retry_interval_ms = 50;
    config.refresh_retry_max = 2;

    let storage = Storage::register(db.task_repo(), db.storage_repo(), config).await?;
    let mut events = storage.take_events().await.expect("事件流应可取走");
    storage.start().await?;

    let task_id = storage.add(&sample_task("ordered")).await?;

    let first = timeout(Duration::from_secs(2), events.recv()).await?.unwrap();
    assert_eq!(first.event_type, TaskEventType::Created);
    let second = timeout(Duration::from_secs(2), events.recv()).await?.unwrap();
    assert_eq!(second.event_type, TaskEventType::Preempted);

    // 带外推高 epoch，逼出 Discarded
    db.bump_task_epoch(task_id, 99).await?;
    let third = timeout(Duration::from_secs(3), events.recv()).await?.unwrap();
    assert_eq!(third.event_type, TaskEventType::Discarded);

    // 无候选者的被放弃任务不会被再次认领，也没有后续事件
    assert!(timeout(Duration::from_millis(500), events.recv())
        .await
        .is_err());

    storage.stop(Duration::from_secs(5)).await?;
    Ok(())
}

/// 停止：删除节点行并关闭事件通道
#[tokio::test]
async fn test_stop_deregisters_and_closes_events() -> anyhow::Result<()> {
    let db = TestDatabase::new().await?;
    let storage = Storage::register(db.task_repo(), db.storage_repo(), fast_config()).await?;
    let mut events = storage.take_events().await.expect("事件流应可取走");
    storage.start().await?;

    let storage_id = storage.storage_id();
    assert!(db.storage_row_exists(storage_id).await?);

    storage.stop(Duration::from_secs(5)).await?;

    assert!(!db.storage_row_exists(storage_id).await?);
    // 通道关闭后消费端读到流结束
    assert!(events.recv().await.is_none());

    // 重复停止幂等
    storage.stop(Duration::from_secs(1)).await?;
    Ok(())
}
