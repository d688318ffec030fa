// ==========================================
// 承包商派单引擎 - 派单配置
// ==========================================
// 红线: 非法配置在写入时拒绝，永远不会进入评分器
// ==========================================

use crate::domain::score::{Factor, FactorWeights};
use serde::{Deserialize, Serialize};

/// 权重合计允许误差
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// 单次派单允许的最大渐进报价次数上限
pub const MAX_PROGRESSIVE_ATTEMPTS_CEILING: u32 = 20;

// ==========================================
// AssignmentConfig - 派单可调参数
// ==========================================
// 存储: assignment_config 表 (版本化 JSON)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentConfig {
    /// 配置版本 (写入后由 ConfigManager 分配)
    #[serde(default)]
    pub version: i64,

    /// 因子权重 (合计 100 ± 0.01)
    pub weights: FactorWeights,

    /// 最低可报价综合分
    pub min_score_threshold: f64,

    /// 最大渐进报价次数
    pub max_progressive_attempts: u32,

    /// 报价超时 (秒)
    pub offer_timeout_seconds: u64,

    /// 是否启用评分渐进派单
    #[serde(default = "default_true")]
    pub progressive_enabled: bool,

    /// 是否启用兜底轮询
    pub fallback_enabled: bool,

    /// 是否启用学习调参 (只产出提案)
    pub learning_enabled: bool,

    // ===== 搜索半径 =====
    #[serde(default = "default_initial_radius")]
    pub initial_search_radius_miles: f64,
    #[serde(default = "default_max_radius")]
    pub max_search_radius_miles: f64,
    #[serde(default = "default_expansion_factor")]
    pub radius_expansion_factor: f64,
}

fn default_true() -> bool {
    true
}

fn default_initial_radius() -> f64 {
    25.0
}

fn default_max_radius() -> f64 {
    100.0
}

fn default_expansion_factor() -> f64 {
    2.0
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            version: 0,
            weights: FactorWeights::default_weights(),
            min_score_threshold: 60.0,
            max_progressive_attempts: 3,
            offer_timeout_seconds: 120,
            progressive_enabled: true,
            fallback_enabled: true,
            learning_enabled: false,
            initial_search_radius_miles: default_initial_radius(),
            max_search_radius_miles: default_max_radius(),
            radius_expansion_factor: default_expansion_factor(),
        }
    }
}

impl AssignmentConfig {
    /// 校验配置
    ///
    /// # 返回
    /// 违规项列表; 为空表示合法
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for factor in Factor::ALL {
            let w = self.weights.get(factor);
            if !w.is_finite() || w < 0.0 {
                violations.push(format!("权重 {} 非法: {}", factor, w));
            }
        }

        let sum = self.weights.sum();
        if !sum.is_finite() || (sum - 100.0).abs() > WEIGHT_SUM_TOLERANCE {
            violations.push(format!("权重合计必须为 100 (±{}), 实际 {:.4}", WEIGHT_SUM_TOLERANCE, sum));
        }

        if !(0.0..=100.0).contains(&self.min_score_threshold) {
            violations.push(format!(
                "min_score_threshold 必须在 [0, 100], 实际 {}",
                self.min_score_threshold
            ));
        }

        if self.max_progressive_attempts == 0
            || self.max_progressive_attempts > MAX_PROGRESSIVE_ATTEMPTS_CEILING
        {
            violations.push(format!(
                "max_progressive_attempts 必须在 [1, {}], 实际 {}",
                MAX_PROGRESSIVE_ATTEMPTS_CEILING, self.max_progressive_attempts
            ));
        }

        if self.offer_timeout_seconds == 0 {
            violations.push("offer_timeout_seconds 必须大于 0".to_string());
        }

        if !(self.initial_search_radius_miles.is_finite() && self.initial_search_radius_miles > 0.0) {
            violations.push(format!(
                "initial_search_radius_miles 必须大于 0, 实际 {}",
                self.initial_search_radius_miles
            ));
        }

        if !self.max_search_radius_miles.is_finite()
            || self.max_search_radius_miles < self.initial_search_radius_miles
        {
            violations.push(format!(
                "max_search_radius_miles ({}) 不能小于 initial_search_radius_miles ({})",
                self.max_search_radius_miles, self.initial_search_radius_miles
            ));
        }

        if !(self.radius_expansion_factor.is_finite() && self.radius_expansion_factor > 1.0) {
            violations.push(format!(
                "radius_expansion_factor 必须大于 1, 实际 {}",
                self.radius_expansion_factor
            ));
        }

        violations
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// 搜索半径序列: 初始半径按系数扩大，封顶 max_search_radius_miles
    pub fn search_radii(&self) -> Vec<f64> {
        let mut radii = vec![self.initial_search_radius_miles];
        let mut radius = self.initial_search_radius_miles;
        while radius < self.max_search_radius_miles {
            radius = (radius * self.radius_expansion_factor).min(self.max_search_radius_miles);
            radii.push(radius);
        }
        radii
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AssignmentConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn test_weights_must_sum_to_100() {
        let mut config = AssignmentConfig::default();
        config.weights.proximity += 0.02;
        let violations = config.validate();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("权重合计"));

        // 容差以内合法
        config.weights.proximity -= 0.015;
        assert!(config.is_valid());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = AssignmentConfig::default();
        config.weights.proximity = -5.0;
        config.weights.rating += 30.0;
        assert!(!config.is_valid());
    }

    #[test]
    fn test_threshold_and_attempts_bounds() {
        let mut config = AssignmentConfig::default();
        config.min_score_threshold = 120.0;
        config.max_progressive_attempts = 0;
        config.offer_timeout_seconds = 0;
        assert_eq!(config.validate().len(), 3);
    }

    #[test]
    fn test_search_radii_double_and_cap() {
        let config = AssignmentConfig::default();
        assert_eq!(config.search_radii(), vec![25.0, 50.0, 100.0]);

        let mut config = AssignmentConfig::default();
        config.max_search_radius_miles = 60.0;
        assert_eq!(config.search_radii(), vec![25.0, 50.0, 60.0]);

        config.max_search_radius_miles = 25.0;
        assert_eq!(config.search_radii(), vec![25.0]);
    }

    #[test]
    fn test_json_defaults_for_optional_fields() {
        let json = r#"{
            "weights": {"proximity": 25, "availability": 15, "rating": 15, "specialization": 15,
                        "performance": 10, "workload": 5, "preference": 5, "experience": 10},
            "min_score_threshold": 60,
            "max_progressive_attempts": 3,
            "offer_timeout_seconds": 90,
            "fallback_enabled": true,
            "learning_enabled": false
        }"#;
        let config: AssignmentConfig = serde_json::from_str(json).unwrap();
        assert!(config.progressive_enabled);
        assert_eq!(config.initial_search_radius_miles, 25.0);
        assert!(config.is_valid());
    }
}
