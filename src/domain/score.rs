// ==========================================
// 承包商派单引擎 - 评分领域模型
// ==========================================
// 红线: 因子为固定命名字段，不使用动态键
// 红线: 评分记录写入后不可修改，重新评分产生新记录
//       (唯一例外: outcome 只能沿生命周期单向推进)
// ==========================================

use crate::domain::types::ScoreOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// Factor - 评分因子
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Proximity,
    Availability,
    Rating,
    Specialization,
    Performance,
    Workload,
    Preference,
    Experience,
}

impl Factor {
    pub const ALL: [Factor; 8] = [
        Factor::Proximity,
        Factor::Availability,
        Factor::Rating,
        Factor::Specialization,
        Factor::Performance,
        Factor::Workload,
        Factor::Preference,
        Factor::Experience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::Proximity => "proximity",
            Factor::Availability => "availability",
            Factor::Rating => "rating",
            Factor::Specialization => "specialization",
            Factor::Performance => "performance",
            Factor::Workload => "workload",
            Factor::Preference => "preference",
            Factor::Experience => "experience",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// FactorValues - 按因子命名的数值记录
// ==========================================
// 同一结构用于因子得分 (0-100) 与因子权重 (合计 100)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorValues {
    pub proximity: f64,
    pub availability: f64,
    pub rating: f64,
    pub specialization: f64,
    pub performance: f64,
    pub workload: f64,
    pub preference: f64,
    pub experience: f64,
}

/// 因子得分 (每项 0-100)
pub type FactorScores = FactorValues;

/// 因子权重 (合计 100 ± 0.01)
pub type FactorWeights = FactorValues;

impl FactorValues {
    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Proximity => self.proximity,
            Factor::Availability => self.availability,
            Factor::Rating => self.rating,
            Factor::Specialization => self.specialization,
            Factor::Performance => self.performance,
            Factor::Workload => self.workload,
            Factor::Preference => self.preference,
            Factor::Experience => self.experience,
        }
    }

    pub fn set(&mut self, factor: Factor, value: f64) {
        match factor {
            Factor::Proximity => self.proximity = value,
            Factor::Availability => self.availability = value,
            Factor::Rating => self.rating = value,
            Factor::Specialization => self.specialization = value,
            Factor::Performance => self.performance = value,
            Factor::Workload => self.workload = value,
            Factor::Preference => self.preference = value,
            Factor::Experience => self.experience = value,
        }
    }

    /// 所有因子之和
    pub fn sum(&self) -> f64 {
        Factor::ALL.iter().map(|f| self.get(*f)).sum()
    }

    /// 按 (因子, 值) 迭代
    pub fn iter(&self) -> impl Iterator<Item = (Factor, f64)> + '_ {
        Factor::ALL.iter().map(move |f| (*f, self.get(*f)))
    }

    /// 默认权重
    pub fn default_weights() -> Self {
        Self {
            proximity: 25.0,
            availability: 15.0,
            rating: 15.0,
            specialization: 15.0,
            performance: 10.0,
            workload: 5.0,
            preference: 5.0,
            experience: 10.0,
        }
    }
}

// ==========================================
// AssignmentScore - 承包商对工单的评分记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentScore {
    pub score_id: String,
    pub run_id: String,
    pub job_id: String,
    pub contractor_id: String,
    pub rank: i32,              // 本次评分运行中的名次 (1 起)
    pub distance_miles: f64,
    pub factor_scores: FactorScores,
    pub composite_score: f64,   // 0-100
    pub recommendation: String, // 可解释的推荐说明
    pub outcome: ScoreOutcome,
    pub config_version: i64,
    pub computed_at: DateTime<Utc>,
}
