// ==========================================
// 承包商派单引擎 - 派单效果快照
// ==========================================
// 口径:
// - total/successful/failed 只统计评分渐进派单的终态尝试
// - success_rate = successful / total * 100
// - average_score = 成功报价综合分均值
// - 兜底/人工指派/无法指派单独计数，不计入评分成功
// ==========================================

use crate::domain::types::PeriodKind;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// EffectivenessSnapshot - 周期效果快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessSnapshot {
    pub period: PeriodKind,
    pub period_start: NaiveDate,

    // ===== 评分派单 =====
    pub total_assignments: i64,
    pub successful_assignments: i64,
    pub failed_assignments: i64,
    pub score_sum: f64, // 成功报价综合分之和 (增量更新均值用)

    // ===== 单独口径 =====
    pub fallback_assignments: i64,
    pub manual_assignments: i64,
    pub unassignable_jobs: i64,

    // ===== 派生指标 =====
    pub success_rate: f64,
    pub average_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl EffectivenessSnapshot {
    /// 创建空快照
    pub fn empty(period: PeriodKind, period_start: NaiveDate) -> Self {
        Self {
            period,
            period_start,
            total_assignments: 0,
            successful_assignments: 0,
            failed_assignments: 0,
            score_sum: 0.0,
            fallback_assignments: 0,
            manual_assignments: 0,
            unassignable_jobs: 0,
            success_rate: 0.0,
            average_score: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// 根据计数重算派生指标
    pub fn recalculate(&mut self) {
        self.success_rate = if self.total_assignments > 0 {
            self.successful_assignments as f64 / self.total_assignments as f64 * 100.0
        } else {
            0.0
        };
        self.average_score = if self.successful_assignments > 0 {
            self.score_sum / self.successful_assignments as f64
        } else {
            0.0
        };
        self.last_updated = Utc::now();
    }
}

/// 计算日期所属周期的起始日
///
/// - DAY: 当天
/// - WEEK: ISO 周一
/// - MONTH: 当月 1 日
pub fn period_start(kind: PeriodKind, date: NaiveDate) -> NaiveDate {
    match kind {
        PeriodKind::Day => date,
        PeriodKind::Week => {
            date - Duration::days(date.weekday().num_days_from_monday() as i64)
        }
        PeriodKind::Month => date.with_day(1).unwrap_or(date),
    }
}

/// 计算周期结束日 (不含)
pub fn period_end(kind: PeriodKind, start: NaiveDate) -> NaiveDate {
    match kind {
        PeriodKind::Day => start + Duration::days(1),
        PeriodKind::Week => start + Duration::days(7),
        PeriodKind::Month => {
            let (year, month) = if start.month() == 12 {
                (start.year() + 1, 1)
            } else {
                (start.year(), start.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(start + Duration::days(31))
        }
    }
}
