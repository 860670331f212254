use serde::{Deserialize, Serialize};

use crate::time::now_millis;

/// 任务记录
///
/// 对应任务表的一行，既承载用户配置，也承载分布式协调状态。
///
/// # 字段说明
///
/// - `id`: 任务的唯一标识符，由数据库生成
/// - `name`: 任务的人类可读名称
/// - `cron`: cron 表达式，协调核心不解析，仅透传
/// - `task_type`: 任务类型，如 "shell"、"http" 等
/// - `parameters`: 任务执行参数，JSON 格式，对核心不透明
/// - `scheduler_status`: 分布式调度状态，见 [`SchedulerStatus`]
/// - `occupier_id`: 当前占有该任务的节点 id，0 表示无人占有
/// - `candidate_id`: 被提名的接管节点 id，0 表示无候选者
/// - `epoch`: 每次续约成功递增，作为乐观并发令牌
/// - `create_time` / `update_time`: unix 毫秒时间戳；
///   `update_time` 同时充当租约新鲜度标记
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInfo {
    pub id: i64,
    pub name: String,
    pub cron: String,
    pub task_type: String,
    pub parameters: serde_json::Value,
    pub scheduler_status: SchedulerStatus,
    pub occupier_id: i64,
    pub candidate_id: i64,
    pub epoch: i64,
    pub create_time: i64,
    pub update_time: i64,
}

/// 任务调度状态
///
/// 状态机见任务所有权设计：`Created` 为插入初始态，`End` 为终态，
/// 任务可以在 `Preempted` 与 `Discarded` 之间多次往返。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerStatus {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "PREEMPTED")]
    Preempted,
    #[serde(rename = "DISCARDED")]
    Discarded,
    #[serde(rename = "END")]
    End,
}

impl SchedulerStatus {
    /// 持久化的整数编码
    pub fn as_i16(self) -> i16 {
        match self {
            SchedulerStatus::Created => 0,
            SchedulerStatus::Preempted => 1,
            SchedulerStatus::Discarded => 2,
            SchedulerStatus::End => 3,
        }
    }
}

impl TryFrom<i16> for SchedulerStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SchedulerStatus::Created),
            1 => Ok(SchedulerStatus::Preempted),
            2 => Ok(SchedulerStatus::Discarded),
            3 => Ok(SchedulerStatus::End),
            other => Err(format!("Invalid scheduler status: {other}")),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for SchedulerStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i16 as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Type<sqlx::Sqlite> for SchedulerStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for SchedulerStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let v = <i16 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        SchedulerStatus::try_from(v).map_err(Into::into)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for SchedulerStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let v = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        SchedulerStatus::try_from(v as i16).map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for SchedulerStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <i16 as sqlx::Encode<sqlx::Postgres>>::encode(self.as_i16(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for SchedulerStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <i64 as sqlx::Encode<sqlx::Sqlite>>::encode(i64::from(self.as_i16()), buf)
    }
}

impl TaskInfo {
    /// 创建新任务，初始状态为 `Created`
    pub fn new(
        name: String,
        cron: String,
        task_type: String,
        parameters: serde_json::Value,
    ) -> Self {
        let now = now_millis();
        Self {
            id: 0, // 将由数据库生成
            name,
            cron,
            task_type,
            parameters,
            scheduler_status: SchedulerStatus::Created,
            occupier_id: 0,
            candidate_id: 0,
            epoch: 0,
            create_time: now,
            update_time: now,
        }
    }

    /// 任务是否处于抢占状态
    pub fn is_preempted(&self) -> bool {
        matches!(self.scheduler_status, SchedulerStatus::Preempted)
    }

    /// 任务是否被指定节点占有
    pub fn occupied_by(&self, storage_id: i64) -> bool {
        self.is_preempted() && self.occupier_id == storage_id
    }

    /// 任务是否已有候选者
    pub fn has_candidate(&self) -> bool {
        self.candidate_id != 0
    }
}
