// ==========================================
// 承包商派单引擎 - 外部协作方接口
// ==========================================
// 职责: 定义引擎依赖的外部能力 (距离、报价通知、运维告警)
// 说明: Engine 层定义 trait，部署方提供实现；默认实现仅用于单机运行
// ==========================================

use crate::domain::job::GeoPoint;
use crate::domain::types::JobPriority;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ==========================================
// LocationService - 距离查询
// ==========================================
#[async_trait]
pub trait LocationService: Send + Sync {
    /// 两点间行驶距离 (英里)
    async fn distance_miles(&self, from: GeoPoint, to: GeoPoint) -> anyhow::Result<f64>;
}

/// 地球平均半径 (英里)
const EARTH_RADIUS_MILES: f64 = 3958.8;

/// 直线距离 (haversine)，无路网数据时使用
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLineLocationService;

impl StraightLineLocationService {
    pub fn haversine_miles(from: GeoPoint, to: GeoPoint) -> f64 {
        let (lat1, lat2) = (from.lat.to_radians(), to.lat.to_radians());
        let d_lat = (to.lat - from.lat).to_radians();
        let d_lon = (to.lon - from.lon).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_MILES * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

#[async_trait]
impl LocationService for StraightLineLocationService {
    async fn distance_miles(&self, from: GeoPoint, to: GeoPoint) -> anyhow::Result<f64> {
        let d = Self::haversine_miles(from, to);
        if !d.is_finite() {
            anyhow::bail!("坐标非法: {:?} -> {:?}", from, to);
        }
        Ok(d)
    }
}

// ==========================================
// OfferNotifier - 报价通知
// ==========================================

/// 发送给承包商的报价
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferNotice {
    pub attempt_id: String,
    pub job_id: String,
    pub contractor_id: String,
    pub service_type: String,
    pub priority: JobPriority,
    pub attempt_number: i32,
    pub composite_score: f64,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait OfferNotifier: Send + Sync {
    /// 投递报价; 返回错误时引擎按重试策略重投
    async fn deliver_offer(&self, notice: &OfferNotice) -> anyhow::Result<()>;

    /// 撤回报价 (工单取消); 失败只记日志
    async fn withdraw_offer(&self, notice: &OfferNotice, reason: &str) -> anyhow::Result<()>;
}

/// 仅写日志的通知器
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingOfferNotifier;

#[async_trait]
impl OfferNotifier for LoggingOfferNotifier {
    async fn deliver_offer(&self, notice: &OfferNotice) -> anyhow::Result<()> {
        tracing::info!(
            attempt_id = %notice.attempt_id,
            job_id = %notice.job_id,
            contractor_id = %notice.contractor_id,
            expires_at = %notice.expires_at,
            "报价已投递"
        );
        Ok(())
    }

    async fn withdraw_offer(&self, notice: &OfferNotice, reason: &str) -> anyhow::Result<()> {
        tracing::info!(
            attempt_id = %notice.attempt_id,
            contractor_id = %notice.contractor_id,
            reason,
            "报价已撤回"
        );
        Ok(())
    }
}

// ==========================================
// OperatorAlerter - 运维告警
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    Unassignable, // 工单无法指派
    JobParked,    // 状态异常挂起
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Unassignable => "UNASSIGNABLE",
            AlertKind::JobParked => "JOB_PARKED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub kind: AlertKind,
    pub job_id: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[async_trait]
pub trait OperatorAlerter: Send + Sync {
    async fn raise(&self, alert: &OperatorAlert) -> anyhow::Result<()>;
}

/// 以 WARN 日志形式输出告警
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlerter;

#[async_trait]
impl OperatorAlerter for LoggingAlerter {
    async fn raise(&self, alert: &OperatorAlert) -> anyhow::Result<()> {
        tracing::warn!(
            kind = alert.kind.as_str(),
            job_id = %alert.job_id,
            message = %alert.message,
            "运维告警"
        );
        Ok(())
    }
}

// ==========================================
// DeliveryRetryPolicy - 报价投递重试 (有界指数退避)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRetryPolicy {
    pub max_tries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for DeliveryRetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            exponential_base: 2.0,
        }
    }
}

impl DeliveryRetryPolicy {
    /// 第 retry 次重试前的等待时间 (retry 从 1 起)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.exponential_base.powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor.max(1.0))
            .min(self.max_delay.as_millis() as f64)
            .round();
        Duration::from_millis(millis as u64)
    }
}
